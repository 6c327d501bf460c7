//! Integration test fixtures for Trellis.
//!
//! Provides a representative workflow, run contexts, and a scripted
//! [`JobActions`](trellis_runner::JobActions) double that records every
//! step it is asked to run.
//!
//! # Usage
//!
//! ```ignore
//! use trellis_tests::{ContextFixture, RecordingActions, WorkflowFixture};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let definition = WorkflowFixture::fury();
//!     let actions = RecordingActions::new().fail_on(1, StepKind::Test);
//!     // Run with WorkflowRun::new(definition).execute(...)
//! }
//! ```

pub mod actions;
pub mod fixtures;

pub use actions::RecordingActions;
pub use fixtures::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,trellis_runner=debug")),
        )
        .with_test_writer()
        .try_init();
}
