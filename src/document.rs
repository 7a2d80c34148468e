//! Shapes of the relay documents published by the metrics service.
//!
//! Details records keep every field optional: a missing field is a property of one record,
//! reported when the record is built, not a reason to reject the whole document.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp format used throughout the metrics documents. Always UTC.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .ok()
        .map(|t| t.and_utc())
}

/// A document envelope: publication metadata plus one entry per relay.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Document<T> {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub relays_published: Option<String>,
    pub relays: Vec<T>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct RawRelayDetails {
    pub fingerprint: Option<String>,
    pub nickname: Option<String>,
    pub contact: Option<String>,
    pub last_changed_address_or_port: Option<String>,
    pub consensus_weight: Option<f64>,
    /// `address:port` entries. The first is the primary address; the order of the others is
    /// arbitrary.
    pub or_addresses: Option<Vec<String>>,
    pub dir_address: Option<String>,
    pub recommended_version: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UptimeDocument {
    pub fingerprint: String,
    #[serde(default)]
    pub flags: Option<BTreeMap<String, FlagHistory>>,
}

impl UptimeDocument {
    pub fn flag(&self, flag: Flag) -> Option<&FlagHistory> {
        self.flags.as_ref()?.get(flag.as_str())
    }
}

/// History of one flag, keyed by resolution name (`1_week`, `1_month`, ...).
pub type FlagHistory = BTreeMap<String, HistoryPeriod>;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct HistoryPeriod {
    /// Timestamp of the oldest value.
    pub first: String,
    /// Timestamp of the newest value.
    pub last: String,
    /// Seconds between consecutive values.
    pub interval: u64,
    /// Declared number of values.
    pub count: usize,
    #[serde(default)]
    pub factor: Option<f64>,
    /// Values oldest first, scaled to [`SCALE_ONE`](crate::history::SCALE_ONE). `null` marks a
    /// gap.
    pub values: Vec<Option<f64>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Flag {
    Running,
    Guard,
    V2Dir,
    BadExit,
}

impl Flag {
    /// Flags a relay must have history for to be considered at all.
    pub const REQUIRED: [Flag; 3] = [Flag::Running, Flag::Guard, Flag::V2Dir];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Guard => "Guard",
            Self::V2Dir => "V2Dir",
            Self::BadExit => "BadExit",
        }
    }
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
