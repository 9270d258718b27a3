//! Breakpoint store trait definition.

use taskloom_types::breakpoint::{Breakpoint, Resolution};
use taskloom_types::error::RepositoryError;
use uuid::Uuid;

/// Durable storage for the breakpoint state machine.
///
/// Resolution must be atomic: of two concurrent `resolve_breakpoint` calls
/// for the same pending breakpoint exactly one succeeds.
pub trait BreakpointStore: Send + Sync {
    /// Insert a pending breakpoint. Returns the stored breakpoint, which is
    /// the existing one (possibly resolved) when the ID is already known.
    fn save_breakpoint(
        &self,
        breakpoint: &Breakpoint,
    ) -> impl std::future::Future<Output = Result<Breakpoint, RepositoryError>> + Send;

    fn get_breakpoint(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Breakpoint>, RepositoryError>> + Send;

    /// Move a pending breakpoint to its resolved state.
    ///
    /// Fails with `NotFound` for unknown IDs and `Conflict` when the
    /// breakpoint is already resolved.
    fn resolve_breakpoint(
        &self,
        id: &str,
        resolution: &Resolution,
    ) -> impl std::future::Future<Output = Result<Breakpoint, RepositoryError>> + Send;

    /// List breakpoints, oldest first, optionally for one run and/or only
    /// those still pending.
    fn list_breakpoints(
        &self,
        run_id: Option<&Uuid>,
        pending_only: bool,
    ) -> impl std::future::Future<Output = Result<Vec<Breakpoint>, RepositoryError>> + Send;
}
