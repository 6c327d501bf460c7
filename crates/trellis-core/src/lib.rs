//! Trellis Core
//!
//! Core domain types, traits, and error handling for Trellis.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used across all other crates: the workflow definition, the run context,
//! flag parsing, step gates, and the job and report types.

pub mod context;
pub mod error;
pub mod flags;
pub mod gate;
pub mod ids;
pub mod pipeline;
pub mod run;
pub mod secrets;

pub use context::{ContextResolver, EventKind, OsFamily, RunContext};
pub use error::{Error, Result};
pub use flags::{Flag, FlagParser};
pub use gate::{Gate, GateEvaluator, StepDescriptor};
pub use ids::RunId;
pub use run::{JobDescriptor, JobReport, JobStatus, RunReport, StepKind, StepRecord, StepResult};
pub use secrets::Secrets;
