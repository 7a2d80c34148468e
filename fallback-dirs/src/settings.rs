//! Run settings that do not come from the relay documents.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use fallback_selection::{document::parse_timestamp, Config};

/// The default configuration, overlaid with the JSON file at `path` if one is given.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading config {path:?}"))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing config {path:?}"))
}

/// Accepts RFC 3339 or the `YYYY-MM-DD HH:MM:SS` format of the relay documents (UTC).
pub fn parse_now(value: &str) -> Result<DateTime<Utc>> {
    if let Some(now) = parse_timestamp(value) {
        return Ok(now);
    }
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid time {value:?}: {err}"))
}
