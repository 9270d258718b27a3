//! Observability for taskloom: log filter selection, the global tracing
//! subscriber and the optional OpenTelemetry bridge.

pub mod tracing_setup;

pub use tracing_setup::{LogFormat, TracingOptions, default_filter, init_tracing, shutdown_tracing};
