pub mod escape;
pub mod report;
pub mod settings;
pub mod source;

pub use crate::report::Report;
pub use crate::source::FetchSource;
