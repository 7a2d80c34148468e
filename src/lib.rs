pub mod address;
mod candidates;
pub mod config;
pub mod criteria;
pub mod document;
pub mod error;
pub mod history;
pub mod num;
pub mod redistribute;
mod relay;

pub use crate::candidates::{
    sort_fallbacks, CandidateSet, Fallback, HardError, Selection, SelectionStats, UptimeSummary,
};
pub use crate::config::Config;
pub use crate::document::{Document, Flag, RawRelayDetails, UptimeDocument};
pub use crate::error::{Error, Result};
pub use crate::num::{Normalized, RelayWeight, Weight};
pub use crate::relay::{FlagFractions, RelayRecord};
