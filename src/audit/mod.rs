//! Audit trail: per-unit decision log and call log.

mod call_log;
mod decision_log;

pub use call_log::*;
pub use decision_log::*;
