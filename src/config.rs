//! Selection tunables.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Thresholds and limits applied when selecting fallbacks.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Relays that changed address or port more recently than this are excluded.
    pub address_and_port_stable_days: u32,
    /// Minimum time-weighted fraction of Running.
    pub cutoff_running: f64,
    /// Minimum time-weighted fraction of Guard.
    pub cutoff_guard: f64,
    /// Minimum time-weighted fraction of V2Dir.
    pub cutoff_v2dir: f64,
    /// Maximum time-weighted fraction of BadExit. 0.0 means no bad exits at all.
    pub permitted_badexit: f64,
    /// Eligible relays beyond this count are dropped, lowest weight first.
    pub max_fallback_count: usize,
    /// Fewer fallbacks than this is reported as a hard error in the output.
    pub min_fallback_count: usize,
    /// No fallback may carry more than this fraction of the total weight.
    pub target_max_weight_fraction: f64,
    /// Applied to the target when capping, leaving headroom for later exclusions.
    pub reweighting_fudge_factor: f64,
    /// Fallbacks below this fraction of the total weight are dropped.
    pub min_weight_fraction: f64,
}

impl Default for Config {
    fn default() -> Self {
        let max_fallback_count = 500;
        Self {
            address_and_port_stable_days: 120,
            cutoff_running: 0.95,
            cutoff_guard: 0.95,
            cutoff_v2dir: 0.95,
            permitted_badexit: 0.0,
            max_fallback_count,
            min_fallback_count: 100,
            target_max_weight_fraction: 1.0 / 10.0,
            reweighting_fudge_factor: 0.8,
            min_weight_fraction: 1.0 / (10.0 * max_fallback_count as f64),
        }
    }
}

impl Config {
    /// The weight ceiling used while capping, as a fraction of the total.
    pub fn capped_fraction(&self) -> f64 {
        self.target_max_weight_fraction * self.reweighting_fudge_factor
    }

    pub fn validate(&self) -> Result<()> {
        let fractions = [
            ("cutoff_running", self.cutoff_running),
            ("cutoff_guard", self.cutoff_guard),
            ("cutoff_v2dir", self.cutoff_v2dir),
            ("permitted_badexit", self.permitted_badexit),
            ("min_weight_fraction", self.min_weight_fraction),
        ];
        for (field, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidConfig {
                    field,
                    reason: format!("{value} is outside [0, 1]"),
                });
            }
        }
        let positive_fractions = [
            ("target_max_weight_fraction", self.target_max_weight_fraction),
            ("reweighting_fudge_factor", self.reweighting_fudge_factor),
        ];
        for (field, value) in positive_fractions {
            if !(value > 0.0 && value <= 1.0) {
                return Err(Error::InvalidConfig {
                    field,
                    reason: format!("{value} is outside (0, 1]"),
                });
            }
        }
        if self.max_fallback_count == 0 {
            return Err(Error::InvalidConfig {
                field: "max_fallback_count",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.min_fallback_count > self.max_fallback_count {
            return Err(Error::InvalidConfig {
                field: "min_fallback_count",
                reason: format!(
                    "{} exceeds max_fallback_count {}",
                    self.min_fallback_count, self.max_fallback_count
                ),
            });
        }
        if self.min_weight_fraction > self.target_max_weight_fraction {
            return Err(Error::InvalidConfig {
                field: "min_weight_fraction",
                reason: format!(
                    "{} exceeds target_max_weight_fraction {}",
                    self.min_weight_fraction, self.target_max_weight_fraction
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.address_and_port_stable_days, 120);
        assert_eq!(config.min_weight_fraction, 0.0002);
        assert!((config.capped_fraction() - 0.08).abs() < 1e-12);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "max_fallback_count": 50, "min_fallback_count": 10 }"#)
                .unwrap();
        assert_eq!(config.max_fallback_count, 50);
        assert_eq!(config.min_fallback_count, 10);
        assert_eq!(config.cutoff_guard, 0.95);
        config.validate().unwrap();
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(serde_json::from_str::<Config>(r#"{ "max_count": 50 }"#).is_err());
    }

    #[test]
    fn inconsistent_values_rejected() {
        let config = Config {
            reweighting_fudge_factor: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig {
                field: "reweighting_fudge_factor",
                ..
            })
        ));

        let config = Config {
            min_fallback_count: 600,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig {
                field: "min_fallback_count",
                ..
            })
        ));

        let config = Config {
            cutoff_running: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
