//! The ledger itself.
//!
//! Records are written either standalone or inside the caller's
//! transaction. For DDL the orchestrator writes the record and metadata in
//! one transaction, issues the DDL between pre-record and commit, and
//! rolls back on DDL failure, which keeps record and side effect atomic.

use crate::record::{MutationKind, MutationRecord};
use chrono::{DateTime, Utc};
use pilot_core::{CorrelationId, PilotError, PilotResult, TenantId};
use pilot_db::{map_sqlx_error, PilotPool};
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Filter for [`AuditLog::recent`].
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Only this kind.
    pub kind: Option<MutationKind>,
    /// Only this table.
    pub table: Option<String>,
    /// Only this tenant.
    pub tenant: Option<TenantId>,
}

/// The append-only audit log.
pub struct AuditLog {
    pool: Arc<PilotPool>,
}

impl AuditLog {
    /// Create a log over the shared pool.
    #[must_use]
    pub fn new(pool: Arc<PilotPool>) -> Self {
        Self { pool }
    }

    fn emit(kind: MutationKind, correlation_id: CorrelationId, payload: &serde_json::Value) {
        info!(
            target: "audit",
            kind = %kind,
            correlation_id = %correlation_id,
            payload = %payload,
            "mutation recorded"
        );
    }

    /// Append a record. Returns the correlation id for user-visible
    /// errors.
    ///
    /// # Errors
    /// Maps write failures to [`PilotError::AuditWriteFailure`].
    pub async fn record(
        &self,
        kind: MutationKind,
        tenant: Option<TenantId>,
        table: Option<&str>,
        field: Option<&str>,
        payload: serde_json::Value,
    ) -> PilotResult<CorrelationId> {
        let correlation_id = CorrelationId::generate();
        self.record_with_correlation(correlation_id, kind, tenant, table, field, payload)
            .await?;
        Ok(correlation_id)
    }

    /// Append a record under a caller-supplied correlation id, for paths
    /// that must hand the id out before the write completes.
    ///
    /// # Errors
    /// Maps write failures to [`PilotError::AuditWriteFailure`].
    pub async fn record_with_correlation(
        &self,
        correlation_id: CorrelationId,
        kind: MutationKind,
        tenant: Option<TenantId>,
        table: Option<&str>,
        field: Option<&str>,
        payload: serde_json::Value,
    ) -> PilotResult<()> {
        sqlx::query(
            "INSERT INTO audit.mutations \
             (correlation_id, tenant_id, kind, table_name, field_name, payload) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(correlation_id.0)
        .bind(tenant.map(|t| t.0))
        .bind(kind.as_str())
        .bind(table)
        .bind(field)
        .bind(&payload)
        .execute(self.pool.inner())
        .await
        .map_err(|e| PilotError::AuditWriteFailure {
            message: e.to_string(),
        })?;

        Self::emit(kind, correlation_id, &payload);
        Ok(())
    }

    /// Append a record inside the caller's transaction, so the record and
    /// the operation it describes commit or roll back together.
    ///
    /// # Errors
    /// Maps write failures to [`PilotError::AuditWriteFailure`].
    pub async fn record_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        kind: MutationKind,
        tenant: Option<TenantId>,
        table: Option<&str>,
        field: Option<&str>,
        payload: serde_json::Value,
    ) -> PilotResult<CorrelationId> {
        let correlation_id = CorrelationId::generate();
        sqlx::query(
            "INSERT INTO audit.mutations \
             (correlation_id, tenant_id, kind, table_name, field_name, payload) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(correlation_id.0)
        .bind(tenant.map(|t| t.0))
        .bind(kind.as_str())
        .bind(table)
        .bind(field)
        .bind(&payload)
        .execute(&mut **tx)
        .await
        .map_err(|e| PilotError::AuditWriteFailure {
            message: e.to_string(),
        })?;

        Self::emit(kind, correlation_id, &payload);
        Ok(correlation_id)
    }

    fn row_to_record(row: &PgRow) -> PilotResult<MutationRecord> {
        let kind_raw: String = row.try_get("kind").map_err(|e| map_sqlx_error(&e))?;
        let kind = MutationKind::parse(&kind_raw).ok_or_else(|| {
            PilotError::CatalogInconsistent {
                message: format!("unknown mutation kind in ledger: {kind_raw}"),
            }
        })?;
        let correlation: Uuid = row
            .try_get("correlation_id")
            .map_err(|e| map_sqlx_error(&e))?;
        Ok(MutationRecord {
            id: row.try_get("id").map_err(|e| map_sqlx_error(&e))?,
            correlation_id: CorrelationId(correlation),
            tenant: row
                .try_get::<Option<i64>, _>("tenant_id")
                .map_err(|e| map_sqlx_error(&e))?
                .map(TenantId),
            kind,
            table: row.try_get("table_name").map_err(|e| map_sqlx_error(&e))?,
            field: row.try_get("field_name").map_err(|e| map_sqlx_error(&e))?,
            payload: row.try_get("payload").map_err(|e| map_sqlx_error(&e))?,
            occurred_at: row.try_get("occurred_at").map_err(|e| map_sqlx_error(&e))?,
        })
    }

    /// Most recent records matching a filter.
    ///
    /// # Errors
    /// Surfaces database errors.
    pub async fn recent(
        &self,
        filter: &RecordFilter,
        limit: i64,
    ) -> PilotResult<Vec<MutationRecord>> {
        let rows = sqlx::query(
            "SELECT id, correlation_id, tenant_id, kind, table_name, field_name, payload, occurred_at \
             FROM audit.mutations \
             WHERE ($1::text IS NULL OR kind = $1) \
               AND ($2::text IS NULL OR table_name = $2) \
               AND ($3::bigint IS NULL OR tenant_id = $3) \
             ORDER BY occurred_at DESC, id DESC \
             LIMIT $4",
        )
        .bind(filter.kind.map(MutationKind::as_str))
        .bind(filter.table.as_deref())
        .bind(filter.tenant.map(|t| t.0))
        .bind(limit)
        .fetch_all(self.pool.inner())
        .await
        .map_err(|e| map_sqlx_error(&e))?;

        rows.iter().map(Self::row_to_record).collect()
    }

    /// Per-kind counts over a trailing window.
    ///
    /// # Errors
    /// Surfaces database errors.
    pub async fn summary(&self, window: Duration) -> PilotResult<Vec<(MutationKind, i64)>> {
        let since: DateTime<Utc> = Utc::now()
            - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::days(7));
        let rows = sqlx::query(
            "SELECT kind, COUNT(*) AS count FROM audit.mutations \
             WHERE occurred_at >= $1 GROUP BY kind ORDER BY count DESC",
        )
        .bind(since)
        .fetch_all(self.pool.inner())
        .await
        .map_err(|e| map_sqlx_error(&e))?;

        let mut summary = Vec::with_capacity(rows.len());
        for row in rows {
            let kind_raw: String = row.try_get("kind").map_err(|e| map_sqlx_error(&e))?;
            let count: i64 = row.try_get("count").map_err(|e| map_sqlx_error(&e))?;
            if let Some(kind) = MutationKind::parse(&kind_raw) {
                summary.push((kind, count));
            }
        }
        Ok(summary)
    }

    /// Every record mentioning an index by name in its payload.
    ///
    /// # Errors
    /// Surfaces database errors.
    pub async fn by_index(&self, index_name: &str) -> PilotResult<Vec<MutationRecord>> {
        let rows = sqlx::query(
            "SELECT id, correlation_id, tenant_id, kind, table_name, field_name, payload, occurred_at \
             FROM audit.mutations \
             WHERE payload->>'index_name' = $1 \
             ORDER BY occurred_at ASC, id ASC",
        )
        .bind(index_name)
        .fetch_all(self.pool.inner())
        .await
        .map_err(|e| map_sqlx_error(&e))?;

        rows.iter().map(Self::row_to_record).collect()
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").finish_non_exhaustive()
    }
}
