//! Core data models for pagescribe.

mod config;
mod error;
mod page;
mod resolver;

pub use config::*;
pub use error::*;
pub use page::*;
pub use resolver::*;
