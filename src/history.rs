//! Reduce a multi-resolution flag history to a single time-decayed fraction.
//!
//! The metrics service publishes each flag's history at several resolutions (1 week at 1 hour,
//! 1 month at 4 hours, ...) which overlap in time. Walking backwards from "now", finest
//! resolution first, we keep exactly one sample per instant, always the finest available.

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::document::{parse_timestamp, FlagHistory, HistoryPeriod};
use crate::Normalized;

/// Older samples are weighted by `AGE_ALPHA ^ (age in days)`.
pub const AGE_ALPHA: f64 = 0.99;

/// The value history documents use to represent 1.0.
pub const SCALE_ONE: f64 = 999.0;

const SECONDS_PER_DAY: f64 = 24.0 * 3600.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub age_seconds: f64,
    pub interval_seconds: f64,
    pub value: f64,
}

impl Sample {
    fn weight(&self) -> f64 {
        self.interval_seconds * AGE_ALPHA.powf(self.age_seconds / SECONDS_PER_DAY)
    }
}

/// Extract one sample per time interval from `history`, preferring smaller intervals. `subject`
/// only identifies the history in log output.
///
/// Returns an error naming the period if one of its timestamps cannot be parsed.
pub fn samples(
    history: &FlagHistory,
    now: DateTime<Utc>,
    subject: &str,
) -> Result<Vec<Sample>, String> {
    let mut periods: Vec<(&String, &HistoryPeriod)> = history.iter().collect();
    periods.sort_by_key(|(name, period)| (period.interval, *name));

    let mut samples = Vec::new();
    let mut newest = now;
    for (name, period) in periods {
        let interval = i64::try_from(period.interval)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| format!("{name} has out of range interval {}", period.interval))?;
        let out_of_range = || format!("{name} reaches past the representable time range");
        let first = parse_timestamp(&period.first)
            .ok_or_else(|| format!("{name} has unparseable first timestamp {:?}", period.first))?;
        let mut this_ts = parse_timestamp(&period.last)
            .ok_or_else(|| format!("{name} has unparseable last timestamp {:?}", period.last))?;

        if period.values.len() != period.count {
            warn!(
                period = %name,
                subject,
                values = period.values.len(),
                count = period.count,
                "inconsistent value count in history"
            );
        }
        for value in period.values.iter().rev() {
            if let Some(value) = value {
                if this_ts <= newest {
                    samples.push(Sample {
                        age_seconds: (now - this_ts).num_milliseconds() as f64 / 1000.0,
                        interval_seconds: period.interval as f64,
                        value: *value,
                    });
                    newest = this_ts;
                }
            }
            this_ts = this_ts
                .checked_sub_signed(interval)
                .ok_or_else(out_of_range)?;
        }
        if this_ts.checked_add_signed(interval) != Some(first) {
            warn!(period = %name, subject, "inconsistent time information in history");
        }
    }
    Ok(samples)
}

/// Weighted mean of `samples`, normalized by [`SCALE_ONE`]. `None` when there are no samples to
/// average.
pub fn decayed_average(samples: &[Sample]) -> Option<Normalized> {
    let (weighted_sum, total_weight) = samples
        .iter()
        .fold((0.0, 0.0), |(sum, total), sample| {
            let weight = sample.weight();
            (sum + sample.value * weight, total + weight)
        });
    if total_weight <= 0.0 {
        return None;
    }
    Normalized::clamp(weighted_sum / total_weight / SCALE_ONE, 0.0, 1.0)
}

/// The time-decayed fraction of time the flag was held, or `None` when the history holds no
/// values.
pub fn flag_fraction(
    history: &FlagHistory,
    now: DateTime<Utc>,
    subject: &str,
) -> Result<Option<Normalized>, String> {
    Ok(decayed_average(&samples(history, now, subject)?))
}
