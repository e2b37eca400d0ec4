//! Scheduled lifecycle passes.
//!
//! Hourly: stale-lock reclaim and breaker bookkeeping. Weekly: unused
//! index detection, redundancy detection, bloat monitoring, foreign-key
//! suggestions, canary resolution. Monthly: storage review, telemetry
//! pruning, utility-model retraining. Every resulting action goes through
//! the safeguard stack and the audit ledger; index drops are only ever
//! proposed for indexes this engine created.

use crate::ddl::compose_drop_index;
use crate::versioning::IndexVersionStore;
use pilot_audit::{AuditLog, MutationKind, RecordFilter};
use pilot_config::{IndexerMode, LifecycleSettings, TelemetrySettings};
use pilot_core::{OperationClass, PilotResult};
use pilot_db::{map_sqlx_error, PilotPool};
use pilot_safeguards::{GateRequest, LockManager, SafeguardStack};
use pilot_scoring::{CandidateScorer, UtilityFeatures};
use serde::Serialize;
use serde_json::json;
use sqlx::Row;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Traffic-share step applied to a healthy canary each weekly pass.
const CANARY_RAMP_STEP: f64 = 0.3;

/// Outcome of one lifecycle pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LifecycleReport {
    /// Stale locks reclaimed.
    pub locks_reclaimed: usize,
    /// Unused indexes found (dropped in apply mode, recorded otherwise).
    pub unused_indexes: usize,
    /// Redundant indexes found.
    pub redundant_indexes: usize,
    /// Tables flagged for bloat.
    pub bloated_tables: usize,
    /// Foreign keys lacking an index.
    pub fk_suggestions: usize,
    /// Canary experiments resolved or ramped.
    pub canaries_touched: usize,
    /// Telemetry rows pruned.
    pub events_pruned: u64,
    /// Model training samples consumed.
    pub training_samples: usize,
}

/// An index B makes index A redundant when A's columns are a leading
/// prefix of B's.
#[must_use]
pub fn find_redundant(indexes: &[(String, Vec<String>)]) -> Vec<(String, String)> {
    let mut redundant = Vec::new();
    for (name_a, fields_a) in indexes {
        for (name_b, fields_b) in indexes {
            if name_a == name_b || fields_a.len() >= fields_b.len() {
                continue;
            }
            if fields_b.starts_with(fields_a) {
                redundant.push((name_a.clone(), name_b.clone()));
                break;
            }
        }
    }
    redundant
}

/// The lifecycle manager.
pub struct LifecycleManager {
    pool: Arc<PilotPool>,
    locks: Arc<LockManager>,
    stack: Arc<SafeguardStack>,
    audit: Arc<AuditLog>,
    versions: Arc<IndexVersionStore>,
    scorer: Arc<CandidateScorer>,
    settings: LifecycleSettings,
    telemetry: TelemetrySettings,
    mode: IndexerMode,
}

impl LifecycleManager {
    /// Assemble the manager from its collaborators.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        pool: Arc<PilotPool>,
        locks: Arc<LockManager>,
        stack: Arc<SafeguardStack>,
        audit: Arc<AuditLog>,
        versions: Arc<IndexVersionStore>,
        scorer: Arc<CandidateScorer>,
        settings: LifecycleSettings,
        telemetry: TelemetrySettings,
        mode: IndexerMode,
    ) -> Self {
        Self {
            pool,
            locks,
            stack,
            audit,
            versions,
            scorer,
            settings,
            telemetry,
            mode,
        }
    }

    /// Hourly: reclaim stale locks, note breaker states.
    pub async fn run_hourly(&self) -> LifecycleReport {
        let mut report = LifecycleReport::default();
        let reclaimed = self.locks.reclaim_stale().await;
        report.locks_reclaimed = reclaimed.len();
        for target in &reclaimed {
            if let Err(error) = self
                .audit
                .record(
                    MutationKind::SystemToggle,
                    None,
                    None,
                    None,
                    json!({"action": "stale_lock_reclaimed", "target": target}),
                )
                .await
            {
                warn!(error = %error, "failed to audit lock reclaim");
            }
        }

        for (class, state) in self.stack.breakers().states() {
            debug!(class = %class, state = ?state, "breaker state");
        }
        report
    }

    /// Weekly: unused, redundant, bloat, foreign keys, canaries.
    pub async fn run_weekly(&self) -> LifecycleReport {
        let mut report = LifecycleReport::default();

        if let Err(error) = self.sweep_unused(&mut report).await {
            warn!(error = %error, "unused-index sweep failed");
        }
        if let Err(error) = self.sweep_redundant(&mut report).await {
            warn!(error = %error, "redundancy sweep failed");
        }
        if let Err(error) = self.sweep_bloat(&mut report).await {
            warn!(error = %error, "bloat sweep failed");
        }
        if let Err(error) = self.sweep_foreign_keys(&mut report).await {
            warn!(error = %error, "foreign-key sweep failed");
        }
        if let Err(error) = self.resolve_canaries(&mut report).await {
            warn!(error = %error, "canary resolution failed");
        }

        info!(
            unused = report.unused_indexes,
            redundant = report.redundant_indexes,
            fk = report.fk_suggestions,
            "weekly lifecycle pass complete"
        );
        report
    }

    /// Monthly: storage review, telemetry pruning, model retraining.
    pub async fn run_monthly(&self) -> LifecycleReport {
        let mut report = LifecycleReport::default();

        if let Err(error) = self.storage_review().await {
            warn!(error = %error, "storage review failed");
        }
        match self.prune_telemetry().await {
            Ok(pruned) => report.events_pruned = pruned,
            Err(error) => warn!(error = %error, "telemetry pruning failed"),
        }
        match self.retrain_model().await {
            Ok(samples) => report.training_samples = samples,
            Err(error) => warn!(error = %error, "model retraining failed"),
        }
        report
    }

    async fn engine_indexes(&self) -> PilotResult<Vec<(String, Vec<String>, String)>> {
        let names = self.versions.all_names().await?;
        let mut indexes = Vec::with_capacity(names.len());
        for name in names {
            if let Some(version) = self.versions.latest(&name).await? {
                let fields: Vec<String> = version
                    .metadata
                    .get("fields")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default();
                indexes.push((name, fields, version.table));
            }
        }
        Ok(indexes)
    }

    async fn drop_through_gates(&self, index_name: &str, table: &str, reason: &str) -> PilotResult<bool> {
        let request = GateRequest {
            class: OperationClass::DropIndex,
            table: table.to_string(),
            existing_index_count: 0,
        };
        let decision = self.stack.evaluate(&request);
        if !decision.allow {
            self.audit
                .record(
                    MutationKind::GateDenial,
                    None,
                    Some(table),
                    None,
                    json!({
                        "gate": decision.gate.map(|g| g.as_str()),
                        "reason": decision.reason,
                        "operation": "drop_index",
                        "index_name": index_name,
                    }),
                )
                .await?;
            return Ok(false);
        }

        if self.mode != IndexerMode::Apply {
            self.audit
                .record(
                    MutationKind::DropIndex,
                    None,
                    Some(table),
                    None,
                    json!({
                        "mode": self.mode.as_str(),
                        "index_name": index_name,
                        "reason": reason,
                    }),
                )
                .await?;
            return Ok(true);
        }

        let drop_sql = compose_drop_index(index_name)?;
        sqlx::query(&drop_sql)
            .execute(self.pool.long_running())
            .await
            .map_err(|e| map_sqlx_error(&e))?;
        self.audit
            .record(
                MutationKind::DropIndex,
                None,
                Some(table),
                None,
                json!({
                    "mode": "apply",
                    "index_name": index_name,
                    "reason": reason,
                }),
            )
            .await?;
        info!(index = index_name, reason = reason, "index dropped");
        Ok(true)
    }

    async fn sweep_unused(&self, report: &mut LifecycleReport) -> PilotResult<()> {
        let rows = sqlx::query(
            "SELECT s.indexrelname AS index_name, s.relname AS table_name \
             FROM pg_stat_user_indexes s \
             WHERE s.idx_scan = 0 \
               AND pg_relation_size(s.indexrelid) > $1",
        )
        .bind(self.settings.unused_size_floor_bytes)
        .fetch_all(self.pool.inner())
        .await
        .map_err(|e| map_sqlx_error(&e))?;

        let ours: Vec<String> = self.versions.all_names().await?;
        for row in rows {
            let index_name: String = row.try_get("index_name").map_err(|e| map_sqlx_error(&e))?;
            if !ours.contains(&index_name) {
                // Host-owned index: suggest, never drop.
                continue;
            }
            let table: String = row.try_get("table_name").map_err(|e| map_sqlx_error(&e))?;
            if self
                .drop_through_gates(&index_name, &table, "no scans in window")
                .await?
            {
                report.unused_indexes += 1;
            }
        }
        Ok(())
    }

    async fn sweep_redundant(&self, report: &mut LifecycleReport) -> PilotResult<()> {
        let indexes = self.engine_indexes().await?;
        let by_fields: Vec<(String, Vec<String>)> = indexes
            .iter()
            .map(|(name, fields, _)| (name.clone(), fields.clone()))
            .collect();
        for (redundant, covering) in find_redundant(&by_fields) {
            let table = indexes
                .iter()
                .find(|(name, _, _)| *name == redundant)
                .map(|(_, _, table)| table.clone())
                .unwrap_or_default();
            let reason = format!("leading columns covered by {covering}");
            if self.drop_through_gates(&redundant, &table, &reason).await? {
                report.redundant_indexes += 1;
            }
        }
        Ok(())
    }

    async fn sweep_bloat(&self, report: &mut LifecycleReport) -> PilotResult<()> {
        let rows = sqlx::query(
            "SELECT relname AS table_name, n_dead_tup, n_live_tup \
             FROM pg_stat_user_tables \
             WHERE n_live_tup > 1000 AND n_dead_tup > n_live_tup / 2",
        )
        .fetch_all(self.pool.inner())
        .await
        .map_err(|e| map_sqlx_error(&e))?;

        for row in rows {
            let table: String = row.try_get("table_name").map_err(|e| map_sqlx_error(&e))?;
            let dead: i64 = row.try_get("n_dead_tup").map_err(|e| map_sqlx_error(&e))?;
            let live: i64 = row.try_get("n_live_tup").map_err(|e| map_sqlx_error(&e))?;
            self.audit
                .record(
                    MutationKind::SystemToggle,
                    None,
                    Some(&table),
                    None,
                    json!({
                        "action": "bloat_detected",
                        "dead_tuples": dead,
                        "live_tuples": live,
                    }),
                )
                .await?;
            report.bloated_tables += 1;
        }
        Ok(())
    }

    async fn sweep_foreign_keys(&self, report: &mut LifecycleReport) -> PilotResult<()> {
        // Foreign-key columns with no index at all are join hazards.
        let rows = sqlx::query(
            "SELECT kcu.table_name, kcu.column_name \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON tc.constraint_name = kcu.constraint_name \
              AND tc.table_schema = kcu.table_schema \
             WHERE tc.constraint_type = 'FOREIGN KEY' \
               AND tc.table_schema = 'public' \
               AND NOT EXISTS ( \
                   SELECT 1 FROM pg_indexes i \
                   WHERE i.schemaname = 'public' \
                     AND i.tablename = kcu.table_name \
                     AND i.indexdef LIKE '%' || kcu.column_name || '%')",
        )
        .fetch_all(self.pool.inner())
        .await
        .map_err(|e| map_sqlx_error(&e))?;

        for row in rows {
            let table: String = row.try_get("table_name").map_err(|e| map_sqlx_error(&e))?;
            let column: String = row.try_get("column_name").map_err(|e| map_sqlx_error(&e))?;
            self.audit
                .record(
                    MutationKind::SystemToggle,
                    None,
                    Some(&table),
                    Some(&column),
                    json!({"action": "foreign_key_index_suggested"}),
                )
                .await?;
            report.fk_suggestions += 1;
        }
        Ok(())
    }

    async fn resolve_canaries(&self, report: &mut LifecycleReport) -> PilotResult<()> {
        let rows = sqlx::query(
            "SELECT id, experiment_name, index_name, table_name, traffic_share \
             FROM lifecycle.ab_experiments WHERE status = 'running'",
        )
        .fetch_all(self.pool.inner())
        .await
        .map_err(|e| map_sqlx_error(&e))?;

        for row in rows {
            let id: i64 = row.try_get("id").map_err(|e| map_sqlx_error(&e))?;
            let index_name: String = row.try_get("index_name").map_err(|e| map_sqlx_error(&e))?;
            let table: String = row.try_get("table_name").map_err(|e| map_sqlx_error(&e))?;
            let share: f64 = row.try_get("traffic_share").map_err(|e| map_sqlx_error(&e))?;

            // Negative evidence: a rollback record for the index.
            let history = self.audit.by_index(&index_name).await?;
            let rolled_back = history
                .iter()
                .any(|record| record.kind == MutationKind::RollbackIndex);

            if rolled_back {
                sqlx::query(
                    "UPDATE lifecycle.ab_experiments \
                     SET status = 'failed', resolved_at = NOW() WHERE id = $1",
                )
                .bind(id)
                .execute(self.pool.inner())
                .await
                .map_err(|e| map_sqlx_error(&e))?;
                self.drop_through_gates(&index_name, &table, "canary failed")
                    .await?;
            } else {
                let next = (share + CANARY_RAMP_STEP).min(1.0);
                let status = if next >= 1.0 { "adopted" } else { "running" };
                sqlx::query(
                    "UPDATE lifecycle.ab_experiments \
                     SET traffic_share = $2, status = $3, \
                         resolved_at = CASE WHEN $3 = 'adopted' THEN NOW() ELSE resolved_at END \
                     WHERE id = $1",
                )
                .bind(id)
                .bind(next)
                .bind(status)
                .execute(self.pool.inner())
                .await
                .map_err(|e| map_sqlx_error(&e))?;
            }
            report.canaries_touched += 1;
        }
        Ok(())
    }

    async fn storage_review(&self) -> PilotResult<()> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(pg_relation_size(i.indexrelid)), 0)::bigint AS total_bytes, \
                    COUNT(*) AS index_count \
             FROM pg_stat_user_indexes i \
             WHERE i.indexrelname LIKE 'pilot_idx_%'",
        )
        .fetch_one(self.pool.inner())
        .await
        .map_err(|e| map_sqlx_error(&e))?;
        let total_bytes: i64 = row.try_get("total_bytes").map_err(|e| map_sqlx_error(&e))?;
        let index_count: i64 = row.try_get("index_count").map_err(|e| map_sqlx_error(&e))?;

        self.audit
            .record(
                MutationKind::SystemToggle,
                None,
                None,
                None,
                json!({
                    "action": "storage_review",
                    "engine_index_bytes": total_bytes,
                    "engine_index_count": index_count,
                }),
            )
            .await?;
        Ok(())
    }

    async fn prune_telemetry(&self) -> PilotResult<u64> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(self.telemetry.retention)
                .unwrap_or_else(|_| chrono::Duration::days(14));
        let result = sqlx::query("DELETE FROM telemetry.events WHERE occurred_at < $1")
            .bind(cutoff)
            .execute(self.pool.inner())
            .await
            .map_err(|e| map_sqlx_error(&e))?;
        Ok(result.rows_affected())
    }

    /// Replay created/rolled-back history into the utility model.
    async fn retrain_model(&self) -> PilotResult<usize> {
        let creations = self
            .audit
            .recent(
                &RecordFilter {
                    kind: Some(MutationKind::CreateIndex),
                    ..Default::default()
                },
                500,
            )
            .await?;

        let mut samples = 0;
        for record in &creations {
            let Some(index_name) = record.payload.get("index_name").and_then(|v| v.as_str())
            else {
                continue;
            };
            let rationale = record.payload.get("rationale").cloned().unwrap_or_default();
            let features = UtilityFeatures::from_raw(
                rationale
                    .get("query_rate_per_hour")
                    .and_then(serde_json::Value::as_f64)
                    .unwrap_or(0.0),
                rationale
                    .get("selectivity")
                    .and_then(serde_json::Value::as_f64)
                    .unwrap_or(0.0),
                0.0,
                0.0,
                rationale
                    .get("composite_score")
                    .and_then(serde_json::Value::as_f64)
                    .unwrap_or(0.0),
            );
            let history = self.audit.by_index(index_name).await?;
            let kept = !history
                .iter()
                .any(|r| r.kind == MutationKind::RollbackIndex);
            self.scorer.model().update(&features, kept);
            samples += 1;
        }
        info!(samples = samples, "utility model retrained");
        Ok(samples)
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("mode", &self.mode)
            .finish()
    }
}
