//! Shared domain types for taskloom.
//!
//! Runs, tasks, breakpoints, process definitions, engine events and
//! configuration, plus the repository error shared by every storage port.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod artifact;
pub mod breakpoint;
pub mod config;
pub mod error;
pub mod event;
pub mod process;
pub mod run;
pub mod task;
