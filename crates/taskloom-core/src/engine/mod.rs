//! Process engine: task planning, execution, fan-out, breakpoints and the
//! step interpreter that ties them together.
//!
//! - `context` -- Per-run context: run ID, clock, effect IDs, logging, cancellation
//! - `registry` / `template` -- Task kinds and their pure spec builders
//! - `executor` -- Record-backed task execution with retry
//! - `parallel` -- Fan-out / fan-in of branches under a policy
//! - `breakpoint` -- Durable human decisions
//! - `definition` -- Process definition parsing and validation
//! - `binding` -- `{{ path }}` references between steps
//! - `checkpoint` -- Run and step persistence
//! - `runner` -- The step interpreter

pub mod binding;
pub mod breakpoint;
pub mod checkpoint;
pub mod context;
pub mod definition;
pub mod error;
pub mod executor;
pub mod parallel;
pub mod registry;
pub mod retry;
pub mod runner;
pub mod template;

pub use breakpoint::{BreakpointError, BreakpointGate};
pub use context::RunContext;
pub use error::TaskError;
pub use executor::TaskExecutor;
pub use parallel::{ParallelCoordinator, ParallelFailure};
pub use registry::{TaskBuilder, TaskContext, TaskRegistry};
pub use runner::{BreakpointMode, ProcessRunner, RunFailure, RunOutcome, RunResult, RunnerOptions, StepFailure};
