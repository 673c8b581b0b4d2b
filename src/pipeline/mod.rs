//! Pipeline module: page discovery, the per-page state machine, output
//! writing and parallel batch orchestration.

mod batch;
mod output;
mod page;
mod source;

pub use batch::*;
pub use output::*;
pub use page::*;
pub use source::*;
