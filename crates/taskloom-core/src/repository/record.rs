//! Task record store trait definition.

use taskloom_types::error::RepositoryError;
use uuid::Uuid;

/// Addressable JSON documents scoped by run.
///
/// Paths are relative (`tasks/<effect_id>/output.json`). Writes must be
/// atomic: a reader sees either the previous document or the new one, never
/// a partial write.
pub trait RecordStore: Send + Sync {
    fn write_record(
        &self,
        run_id: &Uuid,
        path: &str,
        document: &serde_json::Value,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Read a document, `None` if it was never written.
    fn read_record(
        &self,
        run_id: &Uuid,
        path: &str,
    ) -> impl std::future::Future<Output = Result<Option<serde_json::Value>, RepositoryError>> + Send;
}
