use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::document::{RawRelayDetails, UptimeDocument};
use crate::num::within_tolerance;
use crate::redistribute::{self, total_weight, Exclusion, Reweighting};
use crate::{criteria, Config, Error, RelayRecord, RelayWeight, Result, Weight};

/// A relay in the working selection, with the weight it is served at.
#[derive(Clone, Copy, Debug)]
pub struct Fallback<'r> {
    pub relay: &'r RelayRecord,
    pub weight: RelayWeight,
}

impl<'r> Fallback<'r> {
    pub fn new(relay: &'r RelayRecord) -> Self {
        Self {
            relay,
            weight: RelayWeight::new(relay.consensus_weight()),
        }
    }
}

/// Sort by descending current weight, breaking ties by ascending fingerprint.
pub fn sort_fallbacks(fallbacks: &mut [Fallback]) {
    fallbacks.sort_by(|a, b| {
        b.weight
            .current()
            .cmp(&a.weight.current())
            .then_with(|| a.relay.fingerprint().cmp(b.relay.fingerprint()))
    });
}

/// How many uptime records were merged, and why the others were not.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UptimeSummary {
    pub merged: usize,
    pub unknown: usize,
    pub rejected: usize,
}

/// Every relay built from one details document, keyed by fingerprint. Selection borrows from the
/// set and never changes its membership.
#[derive(Clone, Debug, Default)]
pub struct CandidateSet {
    relays: BTreeMap<String, RelayRecord>,
}

impl CandidateSet {
    /// Build a record for each relay. Malformed records and repeated fingerprints are logged and
    /// skipped.
    pub fn from_details<Details>(details: Details) -> Self
    where
        Details: IntoIterator<Item = RawRelayDetails>,
    {
        let mut relays = BTreeMap::new();
        for raw in details {
            let record = match RelayRecord::new(raw) {
                Ok(record) => record,
                Err(err) => {
                    warn!(%err, "skipping relay");
                    continue;
                }
            };
            if relays.contains_key(record.fingerprint()) {
                warn!(fingerprint = record.fingerprint(), "skipping duplicate relay");
                continue;
            }
            relays.insert(record.fingerprint().to_string(), record);
        }
        info!(relays = relays.len(), "loaded relay details");
        Self { relays }
    }

    /// Merge uptime histories into the matching relays. Unknown fingerprints and incomplete or
    /// malformed histories are logged and skipped.
    pub fn add_uptimes<Uptimes>(&mut self, uptimes: Uptimes, now: DateTime<Utc>) -> UptimeSummary
    where
        Uptimes: IntoIterator<Item = UptimeDocument>,
    {
        let mut summary = UptimeSummary::default();
        for uptime in uptimes {
            let Some(record) = self.relays.get_mut(&uptime.fingerprint) else {
                let err = Error::MissingUptimeSubject {
                    fingerprint: uptime.fingerprint,
                };
                debug!(%err, "uptime for unknown relay");
                summary.unknown += 1;
                continue;
            };
            match record.merge_uptime(&uptime, now) {
                Ok(()) => summary.merged += 1,
                Err(err) => {
                    debug!(%err, "uptime not merged");
                    summary.rejected += 1;
                }
            }
        }
        info!(
            merged = summary.merged,
            unknown = summary.unknown,
            rejected = summary.rejected,
            "loaded relay uptimes"
        );
        summary
    }

    pub fn get(&self, fingerprint: &str) -> Option<&RelayRecord> {
        self.relays.get(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    /// Relays meeting the eligibility criteria, heaviest first.
    pub fn eligible(&self, config: &Config, now: DateTime<Utc>) -> Vec<Fallback<'_>> {
        let mut fallbacks: Vec<Fallback> = self
            .relays
            .values()
            .filter(|relay| criteria::is_candidate(relay, config, now))
            .map(Fallback::new)
            .collect();
        sort_fallbacks(&mut fallbacks);
        fallbacks
    }

    /// Select, truncate and reweight the fallbacks. Fails if the weight bounds of `config` cannot
    /// be met, or if any stage breaks the ordering or weight conservation of the selection.
    pub fn compute_fallbacks(&self, config: &Config, now: DateTime<Utc>) -> Result<Selection<'_>> {
        config.validate()?;

        let eligible = self.eligible(config, now);
        let eligible_count = eligible.len();
        let eligible_weight = total_weight(&eligible);
        self.verify("eligibility", &eligible, eligible_weight)?;
        info!(eligible = eligible_count, weight = eligible_weight, "eligible fallbacks");

        let fallbacks = redistribute::truncate(eligible, config.max_fallback_count);
        let mut total = total_weight(&fallbacks);
        self.verify("truncation", &fallbacks, total)?;

        let truncated_weight = total;
        let (fallbacks, reweighting) = redistribute::cap_and_redistribute(fallbacks, config)?;
        self.verify("redistribution", &fallbacks, total)?;

        let (fallbacks, exclusion) =
            redistribute::exclude_below_floor(fallbacks, config.min_weight_fraction);
        total -= exclusion.weight;
        self.verify("exclusion", &fallbacks, total)?;

        redistribute::check_ceiling(&fallbacks, config.target_max_weight_fraction)?;

        let stats = SelectionStats {
            eligible_count,
            eligible_weight,
            max_count: config.max_fallback_count,
            truncated_weight,
            final_count: fallbacks.len(),
            total_weight: total_weight(&fallbacks),
            max_weight: fallbacks.first().map(|f| f.weight.current()),
            min_weight: fallbacks.last().map(|f| f.weight.current()),
            reweighting,
            exclusion,
        };
        info!(
            fallbacks = stats.final_count,
            weight = stats.total_weight,
            excluded = exclusion.count,
            "selected fallbacks"
        );
        Ok(Selection { fallbacks, stats })
    }

    /// Check that `fallbacks` is drawn from this set, sorted, and sums to `expected_total`.
    fn verify(&self, stage: &'static str, fallbacks: &[Fallback], expected_total: f64) -> Result<()> {
        let violation = |reason: String| Error::InvariantViolation { stage, reason };
        for fallback in fallbacks {
            let known = self
                .relays
                .get(fallback.relay.fingerprint())
                .is_some_and(|relay| std::ptr::eq(relay, fallback.relay));
            if !known {
                return Err(violation(format!(
                    "{} is not in the candidate set",
                    fallback.relay.fingerprint()
                )));
            }
        }
        if let Some(pair) = fallbacks
            .windows(2)
            .find(|pair| pair[0].weight.current() < pair[1].weight.current())
        {
            return Err(violation(format!(
                "{} sorted before heavier {}",
                pair[0].relay.fingerprint(),
                pair[1].relay.fingerprint()
            )));
        }
        let total = total_weight(fallbacks);
        if !within_tolerance(total, expected_total) {
            return Err(violation(format!(
                "total weight {total} differs from expected {expected_total}"
            )));
        }
        Ok(())
    }
}

/// Aggregates describing one selection run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SelectionStats {
    pub eligible_count: usize,
    pub eligible_weight: f64,
    pub max_count: usize,
    /// Total weight after truncation, before any reweighting.
    pub truncated_weight: f64,
    pub final_count: usize,
    pub total_weight: f64,
    pub max_weight: Option<Weight>,
    pub min_weight: Option<Weight>,
    pub reweighting: Reweighting,
    pub exclusion: Exclusion,
}

impl SelectionStats {
    pub fn max_weight_fraction(&self) -> f64 {
        self.max_weight
            .map(|w| w.fraction_of(self.total_weight))
            .unwrap_or(0.0)
    }

    pub fn min_weight_fraction(&self) -> f64 {
        self.min_weight
            .map(|w| w.fraction_of(self.total_weight))
            .unwrap_or(0.0)
    }
}

/// Conditions that must break the build of whatever consumes the generated list.
#[derive(Clone, Debug, PartialEq)]
pub enum HardError {
    InsufficientFinalCount { count: usize, minimum: usize },
    MaxWeightFractionExceeded { fraction: f64, target: f64 },
}

impl std::fmt::Display for HardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientFinalCount { count, minimum } => write!(
                f,
                "Fallback count {count} is too low. Must be at least {minimum} for diversity."
            ),
            Self::MaxWeightFractionExceeded { fraction, target } => write!(
                f,
                "Max fallback weight fraction {:.3}% is too high. Must be at most {:.3}% for \
                 client anonymity.",
                fraction * 100.0,
                target * 100.0
            ),
        }
    }
}

/// The final fallbacks, heaviest first, and the statistics of the run that produced them.
#[derive(Clone, Debug)]
pub struct Selection<'r> {
    pub fallbacks: Vec<Fallback<'r>>,
    pub stats: SelectionStats,
}

impl Selection<'_> {
    pub fn hard_errors(&self, config: &Config) -> Vec<HardError> {
        let mut errors = Vec::new();
        if self.stats.final_count < config.min_fallback_count {
            errors.push(HardError::InsufficientFinalCount {
                count: self.stats.final_count,
                minimum: config.min_fallback_count,
            });
        }
        let fraction = self.stats.max_weight_fraction();
        if fraction > config.target_max_weight_fraction
            && !within_tolerance(fraction, config.target_max_weight_fraction)
        {
            errors.push(HardError::MaxWeightFractionExceeded {
                fraction,
                target: config.target_max_weight_fraction,
            });
        }
        errors
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::{details, full_uptime, now};

    fn set(weights: &[f64]) -> CandidateSet {
        let fingerprints: Vec<String> = (0..weights.len()).map(|i| format!("F{i:03}")).collect();
        let mut set = CandidateSet::from_details(
            fingerprints
                .iter()
                .zip(weights)
                .map(|(fingerprint, weight)| details(fingerprint, *weight)),
        );
        set.add_uptimes(fingerprints.iter().map(|f| full_uptime(f)), now());
        set
    }

    fn small_config() -> Config {
        Config {
            max_fallback_count: 10,
            min_fallback_count: 2,
            target_max_weight_fraction: 0.5,
            reweighting_fudge_factor: 1.0,
            min_weight_fraction: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn malformed_and_duplicate_records_are_skipped() {
        let mut malformed = details("BBBB", 5.0);
        malformed.dir_address = None;
        let set = CandidateSet::from_details([
            details("AAAA", 10.0),
            details("AAAA", 20.0),
            malformed,
        ]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("AAAA").unwrap().consensus_weight().as_f64(), 10.0);
        assert!(set.get("BBBB").is_none());
    }

    #[test]
    fn unknown_and_incomplete_uptimes_are_skipped() {
        let mut set = CandidateSet::from_details([details("AAAA", 10.0), details("BBBB", 10.0)]);
        let mut incomplete = full_uptime("BBBB");
        incomplete.flags.as_mut().unwrap().remove("V2Dir");
        let summary = set.add_uptimes(
            [full_uptime("AAAA"), full_uptime("CCCC"), incomplete],
            now(),
        );
        assert_eq!(
            summary,
            UptimeSummary {
                merged: 1,
                unknown: 1,
                rejected: 1
            }
        );
        let eligible = set.eligible(&Config::default(), now());
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].relay.fingerprint(), "AAAA");
    }

    #[test]
    fn scenario_two_members() {
        let set = set(&[900.0, 100.0]);
        let selection = set.compute_fallbacks(&small_config(), now()).unwrap();
        let weights: Vec<f64> = selection
            .fallbacks
            .iter()
            .map(|f| f.weight.current().as_f64())
            .collect();
        assert_eq!(weights, vec![500.0, 500.0]);
        assert_eq!(selection.stats.reweighting.excess, 400.0);
        assert_eq!(selection.stats.total_weight, 1000.0);
        assert_eq!(selection.stats.max_weight_fraction(), 0.5);
        assert!(selection.hard_errors(&small_config()).is_empty());
    }

    #[test]
    fn floor_exclusion_reduces_total() {
        let set = set(&[400.0, 400.0, 199.0, 1.0]);
        let config = Config {
            min_weight_fraction: 0.01,
            ..small_config()
        };
        let selection = set.compute_fallbacks(&config, now()).unwrap();
        assert_eq!(selection.stats.final_count, 3);
        assert_eq!(selection.stats.exclusion.count, 1);
        assert_eq!(selection.stats.total_weight, 999.0);
        assert_eq!(selection.stats.eligible_weight, 1000.0);
    }

    #[test]
    fn too_few_fallbacks_is_a_hard_error() {
        let set = set(&[100.0, 100.0]);
        let config = Config {
            min_fallback_count: 3,
            ..small_config()
        };
        let selection = set.compute_fallbacks(&config, now()).unwrap();
        assert_eq!(
            selection.hard_errors(&config),
            vec![HardError::InsufficientFinalCount {
                count: 2,
                minimum: 3
            }]
        );
    }

    #[test]
    fn heaviest_above_target_is_a_hard_error() {
        let set = set(&[600.0, 400.0]);
        let fallbacks: Vec<Fallback> = ["F000", "F001"]
            .into_iter()
            .map(|fingerprint| Fallback::new(set.get(fingerprint).unwrap()))
            .collect();
        let selection = Selection {
            stats: SelectionStats {
                eligible_count: 2,
                eligible_weight: 1000.0,
                max_count: 10,
                truncated_weight: 1000.0,
                final_count: 2,
                total_weight: 1000.0,
                max_weight: Some(fallbacks[0].weight.current()),
                min_weight: Some(fallbacks[1].weight.current()),
                reweighting: Reweighting::default(),
                exclusion: Exclusion::default(),
            },
            fallbacks,
        };
        let errors = selection.hard_errors(&small_config());
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            HardError::MaxWeightFractionExceeded { fraction, target }
                if fraction == 0.6 && target == 0.5
        ));
        assert!(errors[0].to_string().contains("60.000%"));

        let relaxed = Config {
            target_max_weight_fraction: 0.6,
            ..small_config()
        };
        assert!(selection.hard_errors(&relaxed).is_empty());
    }

    #[test]
    fn malformed_history_is_rejected_unmerged() {
        let mut set = CandidateSet::from_details([details("AAAA", 10.0)]);
        let mut uptime = full_uptime("AAAA");
        let flags = uptime.flags.as_mut().unwrap();
        let guard = flags.get_mut("Guard").unwrap();
        guard.get_mut("1_week").unwrap().last = "not a timestamp".to_string();

        let summary = set.add_uptimes([uptime], now());
        assert_eq!(
            summary,
            UptimeSummary {
                merged: 0,
                unknown: 0,
                rejected: 1
            }
        );
        let relay = set.get("AAAA").unwrap();
        assert_eq!(relay.flags(), &crate::FlagFractions::default());
        assert!(set.eligible(&Config::default(), now()).is_empty());
    }

    #[test]
    fn unachievable_target_aborts() {
        let set = set(&[900.0, 100.0]);
        let config = Config {
            target_max_weight_fraction: 0.4,
            ..small_config()
        };
        let err = set.compute_fallbacks(&config, now()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn invalid_config_aborts() {
        let set = set(&[100.0]);
        let config = Config {
            max_fallback_count: 0,
            min_fallback_count: 0,
            ..small_config()
        };
        assert!(matches!(
            set.compute_fallbacks(&config, now()),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn empty_set_selects_nothing() {
        let set = CandidateSet::default();
        let selection = set.compute_fallbacks(&small_config(), now()).unwrap();
        assert!(selection.fallbacks.is_empty());
        assert_eq!(selection.stats.max_weight_fraction(), 0.0);
        assert_eq!(selection.hard_errors(&small_config()).len(), 1);
    }

    #[test]
    fn foreign_records_break_the_subset_invariant() {
        let set = set(&[100.0]);
        let other = set.clone();
        let fallbacks = other.eligible(&small_config(), now());
        assert!(matches!(
            set.verify("test", &fallbacks, 100.0),
            Err(Error::InvariantViolation { stage: "test", .. })
        ));
    }
}
