//! Matrix expansion and trigger matching for Trellis.

pub mod matrix;
pub mod triggers;

pub use matrix::{MatrixExpander, MatrixExpansion};
pub use triggers::TriggerMatcher;
