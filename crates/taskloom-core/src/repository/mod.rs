//! Storage trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (taskloom-infra) implements. The core crate never depends on any
//! specific storage technology; `memory` provides in-process implementations.

pub mod breakpoint;
pub mod memory;
pub mod record;
pub mod run;

pub use breakpoint::BreakpointStore;
pub use record::RecordStore;
pub use run::RunRepository;
