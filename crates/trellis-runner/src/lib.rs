//! Job execution for Trellis: step sequencing, shell actions, and the
//! parallel matrix executor.

pub mod executor;
pub mod interpolation;
pub mod runner;
pub mod shell;
pub mod workflow;

pub use executor::MatrixExecutor;
pub use interpolation::InterpolationContext;
pub use runner::{CacheBinding, JobActions, PipelineRunner};
pub use shell::{OutputLine, OutputStream, ShellActions};
pub use workflow::{WorkflowRun, plan};
