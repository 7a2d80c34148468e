//! Error types for fallback selection.

use thiserror::Error;

use crate::document::Flag;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building relay records or running the selection pipeline.
///
/// `MalformedRecord`, `MissingUptimeSubject`, `IncompleteFlagData`, `DuplicateHistory` and
/// `MalformedHistory` concern a single record and are handled per record by
/// [`CandidateSet`](crate::CandidateSet). The remaining variants abort the run.
#[derive(Error, Debug)]
pub enum Error {
    /// A details record is missing a required field, or has no usable OR port.
    #[error("malformed relay record {fingerprint}: {reason}")]
    MalformedRecord {
        /// Fingerprint of the record, or `<unknown>` if the field itself is missing.
        fingerprint: String,
        reason: String,
    },

    /// An uptime record refers to a relay absent from the details document.
    #[error("uptime document references unknown relay {fingerprint}")]
    MissingUptimeSubject { fingerprint: String },

    /// An uptime record lacks one of the flags eligibility depends on.
    #[error("uptime document for {fingerprint} has no {flag} history")]
    IncompleteFlagData { fingerprint: String, flag: Flag },

    /// A flag history was merged into the same record a second time.
    #[error("{flag} history for {fingerprint} was already merged")]
    DuplicateHistory { fingerprint: String, flag: Flag },

    /// A history period could not be interpreted.
    #[error("malformed {flag} history for {fingerprint}: {reason}")]
    MalformedHistory {
        fingerprint: String,
        flag: Flag,
        reason: String,
    },

    /// Cap-and-redistribute could not place all of the excess weight.
    #[error(
        "cannot cap {members} fallbacks at {max_acceptable:.3} weight each: {leftover:.3} weight \
         left over; raise target_max_weight_fraction or reweighting_fudge_factor"
    )]
    RedistributionUnachievable {
        members: usize,
        max_acceptable: f64,
        leftover: f64,
    },

    /// After the full pipeline, the heaviest fallback still exceeds the target fraction.
    #[error(
        "heaviest fallback carries {fraction:.5} of total weight, above the target of {target:.5}; \
         lower reweighting_fudge_factor"
    )]
    PostConditionViolation { fraction: f64, target: f64 },

    /// A selection stage broke the ordering, subset or conservation invariant.
    #[error("selection invariant broken after {stage}: {reason}")]
    InvariantViolation { stage: &'static str, reason: String },

    /// Configuration values are inconsistent with each other.
    #[error("invalid configuration '{field}': {reason}")]
    InvalidConfig { field: &'static str, reason: String },
}

impl Error {
    /// Fatal errors abort the run before any output is produced.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::RedistributionUnachievable { .. }
                | Self::PostConditionViolation { .. }
                | Self::InvariantViolation { .. }
                | Self::InvalidConfig { .. }
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fatal_errors_name_the_tunable() {
        let err = Error::RedistributionUnachievable {
            members: 3,
            max_acceptable: 80.0,
            leftover: 12.5,
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("target_max_weight_fraction"));

        let err = Error::PostConditionViolation {
            fraction: 0.12,
            target: 0.1,
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("reweighting_fudge_factor"));
    }

    #[test]
    fn record_errors_are_not_fatal() {
        let err = Error::IncompleteFlagData {
            fingerprint: "AAAA".to_string(),
            flag: Flag::Guard,
        };
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "uptime document for AAAA has no Guard history");

        let err = Error::MissingUptimeSubject {
            fingerprint: "BBBB".to_string(),
        };
        assert!(!err.is_fatal());
    }
}
