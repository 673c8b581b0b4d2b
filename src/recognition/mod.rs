//! Per-page recognition: candidate collection and judge arbitration.

mod collector;
mod judge;

pub use collector::*;
pub use judge::*;
