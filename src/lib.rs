//! pagescribe - multi-model page OCR with judge arbitration.
//!
//! ## Architecture
//!
//! - **CandidateCollector**: calls every configured model `repeat` times per page
//! - **JudgeArbiter**: picks one authoritative text when a page has several candidates
//! - **PageProcessor**: drives one page from collection to a block in the output
//! - **BatchOrchestrator**: runs many document units concurrently, isolating failures
//!
//! Every call lands in a per-unit JSONL call log; every arbitration lands in
//! a per-unit decision log.

pub mod audit;
pub mod client;
pub mod models;
pub mod pipeline;
pub mod recognition;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use client::{LlmClient, ModelInvoker, RateLimiter};
pub use models::{ConfigResolver, JobConfig, Result, ScribeError, Settings};
pub use pipeline::{BatchOrchestrator, BatchReport, BatchUnit};
pub use recognition::{CandidateCollector, JudgeArbiter};
