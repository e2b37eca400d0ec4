//! Index version registry.
//!
//! Every index the engine creates gets exactly one version row holding
//! its full definition, which is what rollback and redundancy detection
//! read back.

use chrono::{DateTime, Utc};
use pilot_core::PilotResult;
use pilot_db::{map_sqlx_error, PilotPool};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, Transaction};
use std::sync::Arc;

/// One registered index version.
#[derive(Debug, Clone, Serialize)]
pub struct IndexVersion {
    /// Version row id.
    pub id: i64,
    /// Index name.
    pub index_name: String,
    /// Table the index lives on.
    pub table: String,
    /// Full CREATE statement.
    pub definition: String,
    /// Component that registered it.
    pub created_by: String,
    /// Structured metadata (kind, fields, operation id).
    pub metadata: serde_json::Value,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

/// The registry.
pub struct IndexVersionStore {
    pool: Arc<PilotPool>,
}

impl IndexVersionStore {
    /// Create a store over the shared pool.
    #[must_use]
    pub fn new(pool: Arc<PilotPool>) -> Self {
        Self { pool }
    }

    fn row_to_version(row: &PgRow) -> PilotResult<IndexVersion> {
        Ok(IndexVersion {
            id: row.try_get("id").map_err(|e| map_sqlx_error(&e))?,
            index_name: row.try_get("index_name").map_err(|e| map_sqlx_error(&e))?,
            table: row.try_get("table_name").map_err(|e| map_sqlx_error(&e))?,
            definition: row.try_get("definition").map_err(|e| map_sqlx_error(&e))?,
            created_by: row.try_get("created_by").map_err(|e| map_sqlx_error(&e))?,
            metadata: row.try_get("metadata").map_err(|e| map_sqlx_error(&e))?,
            created_at: row.try_get("created_at").map_err(|e| map_sqlx_error(&e))?,
        })
    }

    /// Register a version inside the caller's transaction.
    ///
    /// # Errors
    /// Surfaces database errors.
    pub async fn register_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        index_name: &str,
        table: &str,
        definition: &str,
        metadata: serde_json::Value,
    ) -> PilotResult<()> {
        sqlx::query(
            "INSERT INTO lifecycle.index_versions \
             (index_name, table_name, definition, metadata) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(index_name)
        .bind(table)
        .bind(definition)
        .bind(&metadata)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error(&e))?;
        Ok(())
    }

    /// Most recent version for an index name.
    ///
    /// # Errors
    /// Surfaces database errors.
    pub async fn latest(&self, index_name: &str) -> PilotResult<Option<IndexVersion>> {
        let row = sqlx::query(
            "SELECT id, index_name, table_name, definition, created_by, metadata, created_at \
             FROM lifecycle.index_versions WHERE index_name = $1 \
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(index_name)
        .fetch_optional(self.pool.inner())
        .await
        .map_err(|e| map_sqlx_error(&e))?;
        row.as_ref().map(Self::row_to_version).transpose()
    }

    /// Every version registered for a table.
    ///
    /// # Errors
    /// Surfaces database errors.
    pub async fn by_table(&self, table: &str) -> PilotResult<Vec<IndexVersion>> {
        let rows = sqlx::query(
            "SELECT id, index_name, table_name, definition, created_by, metadata, created_at \
             FROM lifecycle.index_versions WHERE table_name = $1 \
             ORDER BY created_at ASC, id ASC",
        )
        .bind(table)
        .fetch_all(self.pool.inner())
        .await
        .map_err(|e| map_sqlx_error(&e))?;
        rows.iter().map(Self::row_to_version).collect()
    }

    /// Names of every index the engine has ever registered.
    ///
    /// # Errors
    /// Surfaces database errors.
    pub async fn all_names(&self) -> PilotResult<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT index_name FROM lifecycle.index_versions")
            .fetch_all(self.pool.inner())
            .await
            .map_err(|e| map_sqlx_error(&e))?;
        rows.iter()
            .map(|row| row.try_get("index_name").map_err(|e| map_sqlx_error(&e)))
            .collect()
    }
}

impl std::fmt::Debug for IndexVersionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexVersionStore").finish_non_exhaustive()
    }
}
