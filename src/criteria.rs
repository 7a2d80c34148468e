use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::{Config, RelayRecord};

/// The first criterion a relay failed.
#[derive(Clone, Debug, PartialEq)]
pub enum Rejection {
    AddressChangedRecently(DateTime<Utc>),
    RunningTooLow(f64),
    GuardTooLow(f64),
    V2DirTooLow(f64),
    BadExitTooHigh(f64),
    NoRecommendedVersion,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AddressChangedRecently(at) => write!(f, "changed address/port recently ({at})"),
            Self::RunningTooLow(avg) => write!(f, "running avg too low ({avg})"),
            Self::GuardTooLow(avg) => write!(f, "guard avg too low ({avg})"),
            Self::V2DirTooLow(avg) => write!(f, "v2dir avg too low ({avg})"),
            Self::BadExitTooHigh(avg) => write!(f, "badexit avg too high ({avg})"),
            Self::NoRecommendedVersion => write!(f, "not running a recommended version"),
        }
    }
}

/// Check `record` against the eligibility thresholds of `config`, returning the first criterion
/// it fails.
pub fn evaluate(
    record: &RelayRecord,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<(), Rejection> {
    // A window reaching past the representable range can never have elapsed.
    let stable_since = Duration::try_days(i64::from(config.address_and_port_stable_days))
        .and_then(|window| now.checked_sub_signed(window));
    if stable_since.map_or(true, |since| record.last_changed_address_or_port() > since) {
        return Err(Rejection::AddressChangedRecently(
            record.last_changed_address_or_port(),
        ));
    }
    let running = record.running().as_f64();
    if running < config.cutoff_running {
        return Err(Rejection::RunningTooLow(running));
    }
    let guard = record.guard().as_f64();
    if guard < config.cutoff_guard {
        return Err(Rejection::GuardTooLow(guard));
    }
    let v2dir = record.v2dir().as_f64();
    if v2dir < config.cutoff_v2dir {
        return Err(Rejection::V2DirTooLow(v2dir));
    }
    if let Some(badexit) = record.badexit() {
        if badexit.as_f64() > config.permitted_badexit {
            return Err(Rejection::BadExitTooHigh(badexit.as_f64()));
        }
    }
    if record.recommended_version() != Some(true) {
        return Err(Rejection::NoRecommendedVersion);
    }
    Ok(())
}

pub fn is_candidate(record: &RelayRecord, config: &Config, now: DateTime<Utc>) -> bool {
    match evaluate(record, config, now) {
        Ok(()) => true,
        Err(rejection) => {
            debug!(fingerprint = record.fingerprint(), "not a candidate: {rejection}");
            false
        }
    }
}
