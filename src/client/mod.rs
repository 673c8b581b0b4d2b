//! Recognition client module.

mod invoker;
mod llm_client;
mod rate_limiter;

pub use invoker::*;
pub use llm_client::*;
pub use rate_limiter::*;
