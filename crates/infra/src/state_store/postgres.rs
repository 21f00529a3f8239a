//! Postgres-backed state store.
//!
//! Expects a key-value table:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS recalc_state (
//!     key        TEXT PRIMARY KEY,
//!     revision   BIGINT NOT NULL,
//!     state      JSONB NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```
//!
//! The revision check is part of the `UPDATE`/`INSERT` statement itself, so
//! two writers racing on the same revision cannot both succeed.
//!
//! The store is synchronous: calls block on the runtime handle it was built
//! with and must come from outside that runtime's async context (executor and
//! timer threads, or `spawn_blocking`).

use std::sync::Arc;

use sqlx::{PgPool, Row};
use tokio::runtime::Handle;

use recalc_core::{ExpectedRevision, JobState};

use super::{StateStore, StateStoreError, StoredState, STATE_KEY};

#[derive(Debug, Clone)]
pub struct PostgresStateStore {
    pool: Arc<PgPool>,
    handle: Handle,
}

impl PostgresStateStore {
    pub fn new(pool: PgPool, handle: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            handle,
        }
    }

    /// Create the backing table if it does not exist yet.
    pub async fn ensure_schema(pool: &PgPool) -> Result<(), StateStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS recalc_state (
                key        TEXT PRIMARY KEY,
                revision   BIGINT NOT NULL,
                state      JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn current_revision(pool: &PgPool) -> Result<u64, StateStoreError> {
        let row = sqlx::query("SELECT revision FROM recalc_state WHERE key = $1")
            .bind(STATE_KEY)
            .fetch_optional(pool)
            .await
            .map_err(map_sqlx_error)?;

        match row {
            Some(row) => Ok(row.try_get::<i64, _>("revision").map_err(map_sqlx_error)? as u64),
            None => Ok(0),
        }
    }
}

impl StateStore for PostgresStateStore {
    fn load(&self) -> Result<Option<StoredState>, StateStoreError> {
        let pool = self.pool.clone();

        self.handle.block_on(async move {
            let row = sqlx::query("SELECT revision, state FROM recalc_state WHERE key = $1")
                .bind(STATE_KEY)
                .fetch_optional(&*pool)
                .await
                .map_err(map_sqlx_error)?;

            let Some(row) = row else {
                return Ok(None);
            };

            let revision: i64 = row.try_get("revision").map_err(map_sqlx_error)?;
            let state: serde_json::Value = row.try_get("state").map_err(map_sqlx_error)?;
            let state: JobState = serde_json::from_value(state)
                .map_err(|e| StateStoreError::Serialization(e.to_string()))?;

            Ok(Some(StoredState {
                revision: revision as u64,
                state,
            }))
        })
    }

    fn store(&self, expected: ExpectedRevision, state: &JobState) -> Result<u64, StateStoreError> {
        let pool = self.pool.clone();
        let payload = serde_json::to_value(state)
            .map_err(|e| StateStoreError::Serialization(e.to_string()))?;

        self.handle.block_on(async move {
            let row = match expected {
                ExpectedRevision::Any => sqlx::query(
                    r#"
                    INSERT INTO recalc_state (key, revision, state)
                    VALUES ($1, 1, $2)
                    ON CONFLICT (key) DO UPDATE SET
                        revision = recalc_state.revision + 1,
                        state = EXCLUDED.state,
                        updated_at = NOW()
                    RETURNING revision
                    "#,
                )
                .bind(STATE_KEY)
                .bind(&payload)
                .fetch_optional(&*pool)
                .await,
                ExpectedRevision::Exact(0) => sqlx::query(
                    r#"
                    INSERT INTO recalc_state (key, revision, state)
                    VALUES ($1, 1, $2)
                    ON CONFLICT (key) DO NOTHING
                    RETURNING revision
                    "#,
                )
                .bind(STATE_KEY)
                .bind(&payload)
                .fetch_optional(&*pool)
                .await,
                ExpectedRevision::Exact(revision) => sqlx::query(
                    r#"
                    UPDATE recalc_state
                    SET revision = revision + 1, state = $3, updated_at = NOW()
                    WHERE key = $1 AND revision = $2
                    RETURNING revision
                    "#,
                )
                .bind(STATE_KEY)
                .bind(revision as i64)
                .bind(&payload)
                .fetch_optional(&*pool)
                .await,
            }
            .map_err(map_sqlx_error)?;

            match row {
                Some(row) => Ok(row.try_get::<i64, _>("revision").map_err(map_sqlx_error)? as u64),
                None => {
                    let actual = Self::current_revision(&pool).await?;
                    Err(StateStoreError::Conflict { expected, actual })
                }
            }
        })
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StateStoreError {
    match err {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StateStoreError::Serialization(err.to_string())
        }
        other => StateStoreError::Backend(other.to_string()),
    }
}
