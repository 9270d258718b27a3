//! SQLite breakpoint store implementation.
//!
//! The resolve transition is a single conditional UPDATE guarded by
//! `state = 'pending'`, so concurrent resolvers across processes race on the
//! writer connection and exactly one wins.

use chrono::Utc;
use sqlx::Row;
use taskloom_core::repository::BreakpointStore;
use taskloom_types::breakpoint::{Breakpoint, Resolution};
use taskloom_types::error::RepositoryError;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, from_json, parse_datetime, parse_enum, parse_uuid, to_json};

/// SQLite-backed implementation of `BreakpointStore`.
#[derive(Clone)]
pub struct SqliteBreakpointStore {
    pool: DatabasePool,
}

impl SqliteBreakpointStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct BreakpointRow {
    id: String,
    run_id: String,
    step_id: String,
    title: String,
    question: String,
    context: String,
    state: String,
    resolution: Option<String>,
    created_at: String,
    resolved_at: Option<String>,
}

impl BreakpointRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            step_id: row.try_get("step_id")?,
            title: row.try_get("title")?,
            question: row.try_get("question")?,
            context: row.try_get("context")?,
            state: row.try_get("state")?,
            resolution: row.try_get("resolution")?,
            created_at: row.try_get("created_at")?,
            resolved_at: row.try_get("resolved_at")?,
        })
    }

    fn into_breakpoint(self) -> Result<Breakpoint, RepositoryError> {
        Ok(Breakpoint {
            id: self.id,
            run_id: parse_uuid(&self.run_id)?,
            step_id: self.step_id,
            title: self.title,
            question: self.question,
            context: from_json("breakpoint context", &self.context)?,
            state: parse_enum("breakpoint state", &self.state)?,
            resolution: self
                .resolution
                .as_deref()
                .map(|s| from_json("resolution", s))
                .transpose()?,
            created_at: parse_datetime(&self.created_at)?,
            resolved_at: self.resolved_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

impl SqliteBreakpointStore {
    async fn fetch(&self, id: &str) -> Result<Option<Breakpoint>, RepositoryError> {
        // Read through the writer so a caller sees its own just-committed write.
        let row = sqlx::query("SELECT * FROM breakpoints WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = BreakpointRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_breakpoint()?))
            }
            None => Ok(None),
        }
    }
}

impl BreakpointStore for SqliteBreakpointStore {
    async fn save_breakpoint(&self, breakpoint: &Breakpoint) -> Result<Breakpoint, RepositoryError> {
        sqlx::query(
            r#"INSERT INTO breakpoints
               (id, run_id, step_id, title, question, context, state, resolution, created_at, resolved_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO NOTHING"#,
        )
        .bind(&breakpoint.id)
        .bind(breakpoint.run_id.to_string())
        .bind(&breakpoint.step_id)
        .bind(&breakpoint.title)
        .bind(&breakpoint.question)
        .bind(to_json(&breakpoint.context)?)
        .bind(breakpoint.state.as_str())
        .bind(breakpoint.resolution.as_ref().map(to_json).transpose()?)
        .bind(format_datetime(&breakpoint.created_at))
        .bind(breakpoint.resolved_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        self.fetch(&breakpoint.id).await?.ok_or(RepositoryError::NotFound)
    }

    async fn get_breakpoint(&self, id: &str) -> Result<Option<Breakpoint>, RepositoryError> {
        self.fetch(id).await
    }

    async fn resolve_breakpoint(&self, id: &str, resolution: &Resolution) -> Result<Breakpoint, RepositoryError> {
        let result = sqlx::query(
            "UPDATE breakpoints SET state = ?, resolution = ?, resolved_at = ? WHERE id = ? AND state = 'pending'",
        )
        .bind(resolution.decision.resulting_state().as_str())
        .bind(to_json(resolution)?)
        .bind(format_datetime(&Utc::now()))
        .bind(id)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return match self.fetch(id).await? {
                Some(existing) => Err(RepositoryError::Conflict(format!(
                    "breakpoint {id} already {}",
                    existing.state.as_str()
                ))),
                None => Err(RepositoryError::NotFound),
            };
        }

        tracing::debug!(breakpoint_id = id, decision = resolution.decision.as_str(), "resolved breakpoint");
        self.fetch(id).await?.ok_or(RepositoryError::NotFound)
    }

    async fn list_breakpoints(
        &self,
        run_id: Option<&Uuid>,
        pending_only: bool,
    ) -> Result<Vec<Breakpoint>, RepositoryError> {
        let mut sql = String::from("SELECT * FROM breakpoints WHERE 1 = 1");
        if run_id.is_some() {
            sql.push_str(" AND run_id = ?");
        }
        if pending_only {
            sql.push_str(" AND state = 'pending'");
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");

        let mut query = sqlx::query(&sql);
        if let Some(run_id) = run_id {
            query = query.bind(run_id.to_string());
        }
        let rows = query
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut breakpoints = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = BreakpointRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            breakpoints.push(r.into_breakpoint()?);
        }
        Ok(breakpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::test_pool;
    use serde_json::json;
    use taskloom_types::breakpoint::{BreakpointContext, BreakpointRequest, BreakpointState, Decision};

    fn pending(id: &str, run_id: Uuid) -> Breakpoint {
        Breakpoint::pending(
            id,
            "review",
            BreakpointRequest {
                question: "Ship it?".to_string(),
                title: "Release".to_string(),
                context: BreakpointContext {
                    run_id,
                    summary: json!({"tests": "green"}),
                    files: vec![],
                },
            },
        )
    }

    fn approve() -> Resolution {
        Resolution {
            decision: Decision::Approve,
            payload: None,
        }
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let store = SqliteBreakpointStore::new(test_pool().await);
        let run_id = Uuid::now_v7();
        let saved = store.save_breakpoint(&pending("bp-1", run_id)).await.unwrap();
        assert_eq!(saved.state, BreakpointState::Pending);

        let loaded = store.get_breakpoint("bp-1").await.unwrap().unwrap();
        assert_eq!(loaded.run_id, run_id);
        assert_eq!(loaded.context.summary["tests"], "green");
        assert!(store.get_breakpoint("bp-missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_returns_existing_resolution() {
        let store = SqliteBreakpointStore::new(test_pool().await);
        let run_id = Uuid::now_v7();
        store.save_breakpoint(&pending("bp-1", run_id)).await.unwrap();
        store
            .resolve_breakpoint(
                "bp-1",
                &Resolution {
                    decision: Decision::Edit,
                    payload: Some(json!({"version": 2})),
                },
            )
            .await
            .unwrap();

        let again = store.save_breakpoint(&pending("bp-1", run_id)).await.unwrap();
        assert_eq!(again.state, BreakpointState::Edited);
        assert_eq!(again.resolution.unwrap().payload, Some(json!({"version": 2})));
    }

    #[tokio::test]
    async fn test_resolve_twice_conflicts() {
        let store = SqliteBreakpointStore::new(test_pool().await);
        store.save_breakpoint(&pending("bp-1", Uuid::now_v7())).await.unwrap();

        let resolved = store.resolve_breakpoint("bp-1", &approve()).await.unwrap();
        assert_eq!(resolved.state, BreakpointState::Approved);
        assert!(resolved.resolved_at.is_some());

        let err = store.resolve_breakpoint("bp-1", &approve()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        let err = store.resolve_breakpoint("bp-unknown", &approve()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_concurrent_resolve_has_one_winner() {
        let store = SqliteBreakpointStore::new(test_pool().await);
        store.save_breakpoint(&pending("bp-race", Uuid::now_v7())).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.resolve_breakpoint("bp-race", &approve()).await
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_list_filters() {
        let store = SqliteBreakpointStore::new(test_pool().await);
        let run_a = Uuid::now_v7();
        let run_b = Uuid::now_v7();
        store.save_breakpoint(&pending("bp-a1", run_a)).await.unwrap();
        store.save_breakpoint(&pending("bp-a2", run_a)).await.unwrap();
        store.save_breakpoint(&pending("bp-b1", run_b)).await.unwrap();
        store.resolve_breakpoint("bp-a1", &approve()).await.unwrap();

        assert_eq!(store.list_breakpoints(None, false).await.unwrap().len(), 3);
        assert_eq!(store.list_breakpoints(None, true).await.unwrap().len(), 2);

        let for_a = store.list_breakpoints(Some(&run_a), false).await.unwrap();
        let ids: Vec<_> = for_a.iter().map(|bp| bp.id.as_str()).collect();
        assert_eq!(ids, vec!["bp-a1", "bp-a2"]);

        let pending_a = store.list_breakpoints(Some(&run_a), true).await.unwrap();
        assert_eq!(pending_a.len(), 1);
        assert_eq!(pending_a[0].id, "bp-a2");
    }
}
