//! The auto-indexer orchestrator.
//!
//! One pass: aggregate telemetry into candidates, score them, fit them
//! into budgets, gate each survivor through the safeguard stack, then
//! branch on mode. In apply mode the DDL runs under an advisory lock with
//! the audit record and version row pending in an open transaction:
//! commit on success, rollback on failure. A verification re-sample
//! follows every creation and a cost regression beyond the configured
//! threshold drops the index again.
//!
//! `CREATE INDEX CONCURRENTLY` cannot run inside a transaction block, so
//! it executes on its own session from the long-running pool while the
//! metadata transaction stays open on another.

use crate::candidates::{
    existing_index_count, select_candidates, table_row_estimate, CandidateStats, CandidateWindow,
};
use crate::ddl::{compose_create_index, compose_drop_index};
use crate::versioning::IndexVersionStore;
use pilot_audit::{AuditLog, MutationKind};
use pilot_catalog::Catalog;
use pilot_config::{IndexerMode, IndexerSettings, ScoringSettings};
use pilot_core::{
    FieldRef, IndexKind, OperationClass, PilotError, PilotResult, QueryKind, TenantId,
};
use pilot_db::{map_sqlx_error, PilotPool};
use pilot_plan::{HeuristicEstimator, PlanAnalyzer, PlanSummary};
use pilot_safeguards::{Gate, GateRequest, LockManager, SafeguardStack};
use pilot_scoring::{
    estimate_selectivity, order_composite_fields, select_index_kind, BudgetedCandidate,
    CandidateScorer, ConstraintBudgets, ConstraintOptimizer, CooccurrenceTracker, QueryProfile,
    SelectivityEstimate, SelectivitySource, Verdict,
};
use pilot_core::quote_ident;
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome counts for one pass, returned by `run_once`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    /// Candidates that cleared the eligibility floor.
    pub candidates: usize,
    /// Candidates the scorer accepted.
    pub accepted: usize,
    /// Indexes actually created (apply mode).
    pub created: usize,
    /// Gate denials recorded.
    pub denied: usize,
    /// Creations rolled back after verification.
    pub rolled_back: usize,
    /// Candidates deferred to a later pass.
    pub deferred: usize,
    /// Candidates dropped by the constraint optimizer.
    pub budget_dropped: usize,
    /// Per-candidate errors that did not abort the pass.
    pub errors: usize,
}

struct Prepared {
    tenant: Option<TenantId>,
    table: String,
    fields: Vec<String>,
    kind: IndexKind,
    confidence: f64,
    rationale: serde_json::Value,
    pre_cost: f64,
    probe_sql: String,
    composite_score: f64,
    existing_indexes: usize,
}

/// The orchestrator.
pub struct AutoIndexer {
    pool: Arc<PilotPool>,
    catalog: Arc<Catalog>,
    analyzer: Arc<PlanAnalyzer>,
    scorer: Arc<CandidateScorer>,
    stack: Arc<SafeguardStack>,
    locks: Arc<LockManager>,
    audit: Arc<AuditLog>,
    cooccurrence: Arc<CooccurrenceTracker>,
    settings: IndexerSettings,
    scoring: ScoringSettings,
}

impl AutoIndexer {
    /// Assemble the orchestrator from its collaborators.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        pool: Arc<PilotPool>,
        catalog: Arc<Catalog>,
        analyzer: Arc<PlanAnalyzer>,
        scorer: Arc<CandidateScorer>,
        stack: Arc<SafeguardStack>,
        locks: Arc<LockManager>,
        audit: Arc<AuditLog>,
        cooccurrence: Arc<CooccurrenceTracker>,
        settings: IndexerSettings,
        scoring: ScoringSettings,
    ) -> Self {
        Self {
            pool,
            catalog,
            analyzer,
            scorer,
            stack,
            locks,
            audit,
            cooccurrence,
            settings,
            scoring,
        }
    }

    fn probe_sql(table: &str, fields: &[String]) -> String {
        let predicate = fields
            .iter()
            .enumerate()
            .map(|(i, field)| format!("{} = ${}", quote_ident(field), i + 1))
            .collect::<Vec<_>>()
            .join(" AND ");
        format!("SELECT * FROM {} WHERE {predicate}", quote_ident(table))
    }

    async fn probe_plan(&self, probe_sql: &str, fields: usize) -> Option<PlanSummary> {
        let params = vec![Some("probe".to_string()); fields];
        match self.analyzer.analyze_fast(probe_sql, &params).await {
            Ok(summary) => {
                self.analyzer.record_plan_backed();
                Some(summary)
            }
            Err(error) => {
                debug!(error = %error, "plan unavailable, using heuristic estimate");
                self.analyzer.record_heuristic();
                None
            }
        }
    }

    async fn selectivity_or_default(&self, table: &str, field: &str) -> SelectivityEstimate {
        match estimate_selectivity(
            &self.pool,
            table,
            field,
            self.scoring.selectivity_tolerance,
        )
        .await
        {
            Ok(estimate) => estimate,
            Err(error) => {
                // Degrade rather than refuse to decide.
                debug!(table = table, field = field, error = %error, "selectivity fallback");
                SelectivityEstimate {
                    distinct_values: 0.0,
                    row_count: 0.0,
                    selectivity: 0.1,
                    source: SelectivitySource::Live,
                }
            }
        }
    }

    async fn prepare_candidate(
        &self,
        stats: &CandidateStats,
        fields: Vec<String>,
        kind_override: Option<IndexKind>,
    ) -> PilotResult<PrepareOutcome> {
        for field in &fields {
            if !self.catalog.is_validated(&stats.table, field).await? {
                debug!(table = %stats.table, field = %field, "skipping unvalidated candidate");
                return Ok(PrepareOutcome::Skipped);
            }
        }

        let table_rows = table_row_estimate(&self.pool, &stats.table).await?;
        let selectivity = self
            .selectivity_or_default(&stats.table, &fields[0])
            .await;

        let probe_sql = Self::probe_sql(&stats.table, &fields);
        let plan = self.probe_plan(&probe_sql, fields.len()).await;
        let used_real_plan = plan.is_some();
        let pre_cost = match &plan {
            Some(plan) => plan.total_cost,
            None => HeuristicEstimator::seq_scan_cost(table_rows),
        };

        let kind = match kind_override {
            Some(kind) => kind,
            None => {
                let descriptor = self.catalog.lookup(&stats.table, &fields[0]).await?;
                let field_type = descriptor
                    .map(|d| d.field_type)
                    .unwrap_or_else(|| "text".to_string());
                // Telemetry carries no predicate shapes, so the profile is
                // equality-dominated until the interceptor enriches it.
                let profile = QueryProfile {
                    equality_ratio: 1.0,
                    ..Default::default()
                };
                select_index_kind(&profile, &field_type).0
            }
        };

        let inputs = pilot_scoring::CandidateInputs {
            table: stats.table.clone(),
            fields: fields.clone(),
            query_rate_per_hour: stats.rate_per_hour,
            avg_duration_ms: stats.avg_duration_ms,
            write_ratio: stats.write_ratio(),
            plan_cost_without: pre_cost,
            plan_cost_with: HeuristicEstimator::index_scan_cost(
                table_rows.max(1.0),
                selectivity.selectivity,
            ),
            used_real_plan,
            selectivity: selectivity.selectivity,
            table_rows,
            build_cost: HeuristicEstimator::index_build_cost(table_rows),
            write_overhead_penalty: stats.write_ratio() * table_rows * 0.01,
            index_kind: kind.clone(),
        };

        let verdict = self.scorer.score(&inputs);
        let rationale = serde_json::to_value(verdict.rationale()).unwrap_or(json!({}));
        match verdict {
            Verdict::Accept { confidence, .. } => {
                let existing = existing_index_count(&self.pool, &stats.table).await?;
                Ok(PrepareOutcome::Ready(Prepared {
                    tenant: stats.tenant,
                    table: stats.table.clone(),
                    fields,
                    kind,
                    confidence,
                    composite_score: verdict_score(&rationale),
                    rationale,
                    pre_cost,
                    probe_sql,
                    existing_indexes: existing,
                }))
            }
            Verdict::Reject { reason, .. } => {
                debug!(table = %stats.table, reason = %reason, "candidate rejected");
                Ok(PrepareOutcome::Skipped)
            }
            Verdict::Defer { reason, .. } => {
                debug!(table = %stats.table, reason = %reason, "candidate deferred");
                Ok(PrepareOutcome::Deferred)
            }
        }
    }

    /// Composite candidates for a table, from the co-occurrence tracker.
    async fn composite_for_table(
        &self,
        stats: &CandidateStats,
    ) -> PilotResult<Option<Vec<String>>> {
        let pairs = self
            .cooccurrence
            .pairs_above(&stats.table, self.scoring.cooccurrence_threshold);
        let Some((field_a, field_b, rate)) = pairs.into_iter().next() else {
            return Ok(None);
        };
        // Value correlation is only measurable for numeric pairs; the
        // co-occurrence rate stands in for it until results accumulate.
        if rate < self.scoring.correlation_threshold {
            return Ok(None);
        }
        let sel_a = self.selectivity_or_default(&stats.table, &field_a).await;
        let sel_b = self.selectivity_or_default(&stats.table, &field_b).await;
        let ordered = order_composite_fields(
            (
                &field_a,
                sel_a.selectivity,
                self.cooccurrence.field_count(&stats.table, &field_a),
            ),
            (
                &field_b,
                sel_b.selectivity,
                self.cooccurrence.field_count(&stats.table, &field_b),
            ),
        );
        Ok(Some(ordered))
    }

    /// Run one full pass. Per-candidate failures are counted, never
    /// propagated.
    pub async fn run_pass(&self) -> PassReport {
        let started = Instant::now();
        let mut report = PassReport::default();

        let window = CandidateWindow::trailing(Duration::from_secs(3600));
        let stats = match select_candidates(
            &self.pool,
            window,
            self.settings.min_queries_per_hour,
        )
        .await
        {
            Ok(stats) => stats,
            Err(error) => {
                warn!(error = %error, "candidate selection failed, skipping pass");
                report.errors += 1;
                return report;
            }
        };
        report.candidates = stats.len();

        // Score singles and at most one composite per table.
        let mut prepared: Vec<Prepared> = Vec::new();
        let mut composite_done: HashSet<String> = HashSet::new();
        for candidate in &stats {
            if started.elapsed() > self.settings.pass_deadline {
                info!("pass deadline reached, remaining candidates requeued");
                break;
            }
            match self
                .prepare_candidate(candidate, vec![candidate.field.clone()], None)
                .await
            {
                Ok(PrepareOutcome::Ready(ready)) => prepared.push(ready),
                Ok(PrepareOutcome::Skipped) => {}
                Ok(PrepareOutcome::Deferred) => report.deferred += 1,
                Err(error) => {
                    warn!(table = %candidate.table, error = %error, "candidate evaluation failed");
                    report.errors += 1;
                }
            }

            if !composite_done.insert(candidate.table.clone()) {
                continue;
            }
            match self.composite_for_table(candidate).await {
                Ok(Some(fields)) => {
                    match self
                        .prepare_candidate(candidate, fields, Some(IndexKind::Composite))
                        .await
                    {
                        Ok(PrepareOutcome::Ready(ready)) => prepared.push(ready),
                        Ok(PrepareOutcome::Skipped) => {}
                        Ok(PrepareOutcome::Deferred) => report.deferred += 1,
                        Err(error) => {
                            debug!(error = %error, "composite scoring failed");
                            report.errors += 1;
                        }
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    debug!(error = %error, "composite evaluation failed");
                    report.errors += 1;
                }
            }
        }
        report.accepted = prepared.len();

        // Constraint pass over everything accepted this round.
        let budgets = ConstraintBudgets {
            max_per_table: self.settings.max_indexes_per_table,
            ..Default::default()
        };
        let existing: HashMap<String, usize> = prepared
            .iter()
            .map(|p| (p.table.clone(), p.existing_indexes))
            .collect();
        let budgeted: Vec<BudgetedCandidate> = prepared
            .iter()
            .map(|p| BudgetedCandidate {
                tenant: p.tenant,
                table: p.table.clone(),
                fields: p.fields.clone(),
                composite_score: p.composite_score,
            })
            .collect();
        let (kept, dropped) = ConstraintOptimizer::new(budgets).optimize(budgeted, &existing);
        report.budget_dropped = dropped.len();
        let kept_keys: Vec<(String, Vec<String>)> = kept
            .iter()
            .map(|c| (c.table.clone(), c.fields.clone()))
            .collect();
        prepared.retain(|p| {
            kept_keys
                .iter()
                .any(|(table, fields)| *table == p.table && *fields == p.fields)
        });

        for candidate in prepared {
            if started.elapsed() > self.settings.pass_deadline {
                info!("pass deadline reached during execution");
                break;
            }
            match self.gate_and_execute(candidate).await {
                Ok(Execution::Created) => report.created += 1,
                Ok(Execution::RolledBack) => {
                    report.created += 1;
                    report.rolled_back += 1;
                }
                Ok(Execution::Recorded) => {}
                Ok(Execution::Denied) => report.denied += 1,
                Err(error) => {
                    warn!(error = %error, "candidate execution failed");
                    report.errors += 1;
                }
            }
        }

        info!(
            candidates = report.candidates,
            accepted = report.accepted,
            created = report.created,
            denied = report.denied,
            rolled_back = report.rolled_back,
            "orchestrator pass complete"
        );
        report
    }

    async fn gate_and_execute(&self, candidate: Prepared) -> PilotResult<Execution> {
        let request = GateRequest {
            class: OperationClass::CreateIndex,
            table: candidate.table.clone(),
            existing_index_count: candidate.existing_indexes,
        };
        let decision = self.stack.evaluate(&request);
        if !decision.allow {
            let gate = decision.gate.map(Gate::as_str).unwrap_or("unknown");
            self.audit
                .record(
                    MutationKind::GateDenial,
                    candidate.tenant,
                    Some(&candidate.table),
                    candidate.fields.first().map(String::as_str),
                    json!({
                        "gate": gate,
                        "reason": decision.reason,
                        "retry_after_s": decision.retry_after.map(|d| d.as_secs_f64()),
                        "operation": "create_index",
                    }),
                )
                .await?;
            return Ok(Execution::Denied);
        }

        match self.settings.mode {
            IndexerMode::Advisory => {
                self.audit
                    .record(
                        MutationKind::CreateIndex,
                        candidate.tenant,
                        Some(&candidate.table),
                        candidate.fields.first().map(String::as_str),
                        json!({
                            "mode": "advisory",
                            "fields": candidate.fields,
                            "index_kind": candidate.kind.name(),
                            "confidence": candidate.confidence,
                            "rationale": candidate.rationale,
                        }),
                    )
                    .await?;
                Ok(Execution::Recorded)
            }
            IndexerMode::DryRun => {
                let (index_name, ddl) =
                    compose_create_index(&candidate.table, &candidate.fields, &candidate.kind)?;
                let predicted_cost = HeuristicEstimator::index_scan_cost(
                    candidate.pre_cost.max(1.0),
                    0.001,
                );
                self.audit
                    .record(
                        MutationKind::CreateIndex,
                        candidate.tenant,
                        Some(&candidate.table),
                        candidate.fields.first().map(String::as_str),
                        json!({
                            "mode": "dry_run",
                            "index_name": index_name,
                            "ddl": ddl,
                            "confidence": candidate.confidence,
                            "pre_cost": candidate.pre_cost,
                            "predicted_post_cost": predicted_cost,
                            "rationale": candidate.rationale,
                        }),
                    )
                    .await?;
                Ok(Execution::Recorded)
            }
            IndexerMode::Apply => self.apply_candidate(candidate).await,
        }
    }

    async fn apply_candidate(&self, candidate: Prepared) -> PilotResult<Execution> {
        let field_refs: Vec<&str> = candidate.fields.iter().map(String::as_str).collect();
        let handle = match self.locks.acquire(&candidate.table, &field_refs).await {
            Ok(handle) => handle,
            Err(error @ PilotError::LockBusy { .. }) => {
                self.audit
                    .record(
                        MutationKind::GateDenial,
                        candidate.tenant,
                        Some(&candidate.table),
                        candidate.fields.first().map(String::as_str),
                        json!({
                            "gate": Gate::LockManager.as_str(),
                            "reason": error.to_string(),
                            "operation": "create_index",
                        }),
                    )
                    .await?;
                return Ok(Execution::Denied);
            }
            Err(error) => return Err(error),
        };

        let result = self.create_verify_register(&candidate).await;
        let release = self.locks.release(handle).await;
        if let Err(error) = release {
            warn!(error = %error, "advisory lock release failed");
        }

        let breaker = self.stack.breakers().breaker(OperationClass::CreateIndex);
        match &result {
            Ok(_) => breaker.record_success(),
            Err(_) => breaker.record_failure(),
        }
        result
    }

    async fn create_verify_register(&self, candidate: &Prepared) -> PilotResult<Execution> {
        let (index_name, ddl) =
            compose_create_index(&candidate.table, &candidate.fields, &candidate.kind)?;
        let operation_id = Uuid::new_v4();

        // Pre-record: the mutation record and version row wait in an open
        // transaction while the DDL runs on its own session.
        let mut tx = self
            .pool
            .inner()
            .begin()
            .await
            .map_err(|e| map_sqlx_error(&e))?;
        AuditLog::record_in_tx(
            &mut tx,
            MutationKind::CreateIndex,
            candidate.tenant,
            Some(&candidate.table),
            candidate.fields.first().map(String::as_str),
            json!({
                "mode": "apply",
                "index_name": index_name,
                "ddl": ddl,
                "operation_id": operation_id,
                "confidence": candidate.confidence,
                "pre_cost": candidate.pre_cost,
                "rationale": candidate.rationale,
            }),
        )
        .await?;
        IndexVersionStore::register_in_tx(
            &mut tx,
            &index_name,
            &candidate.table,
            &ddl,
            json!({
                "fields": candidate.fields,
                "index_kind": candidate.kind.name(),
                "operation_id": operation_id,
            }),
        )
        .await?;

        if let Err(error) = self.execute_ddl_with_retry(&ddl).await {
            tx.rollback().await.ok();
            self.audit
                .record(
                    MutationKind::GateDenial,
                    candidate.tenant,
                    Some(&candidate.table),
                    candidate.fields.first().map(String::as_str),
                    json!({
                        "gate": "ddl_execution",
                        "reason": error.to_string(),
                        "index_name": index_name,
                        "operation_id": operation_id,
                    }),
                )
                .await
                .ok();
            return Err(error);
        }
        tx.commit().await.map_err(|e| map_sqlx_error(&e))?;
        info!(index = %index_name, table = %candidate.table, "index created");

        // Verification: re-sample the representative query with a fresh
        // executed plan and compare against the pre-creation cost.
        let params = vec![Some("probe".to_string()); candidate.fields.len()];
        match self.analyzer.analyze_full(&candidate.probe_sql, &params).await {
            Ok(post) => {
                let limit =
                    candidate.pre_cost * (1.0 + self.settings.rollback_threshold_pct / 100.0);
                if post.total_cost > limit {
                    warn!(
                        index = %index_name,
                        pre_cost = candidate.pre_cost,
                        post_cost = post.total_cost,
                        "post-creation cost regression, rolling back"
                    );
                    self.rollback_index(candidate, &index_name, candidate.pre_cost, post.total_cost)
                        .await?;
                    return Ok(Execution::RolledBack);
                }
                debug!(index = %index_name, post_cost = post.total_cost, "verification passed");
            }
            Err(error) => {
                // Verification is best-effort; a missing plan is a
                // coverage gap, not a rollback trigger.
                debug!(error = %error, "verification plan unavailable");
                self.analyzer.record_heuristic();
            }
        }

        if self.settings.canary_enabled {
            self.register_canary(&index_name, &candidate.table).await?;
        }

        Ok(Execution::Created)
    }

    /// Start a canary experiment at a low traffic share; the lifecycle
    /// manager ramps it up or rolls the index back as evidence arrives.
    async fn register_canary(&self, index_name: &str, table: &str) -> PilotResult<()> {
        sqlx::query(
            "INSERT INTO lifecycle.ab_experiments \
             (experiment_name, index_name, table_name, traffic_share) \
             VALUES ($1, $2, $3, 0.1) \
             ON CONFLICT (experiment_name) DO NOTHING",
        )
        .bind(format!("canary_{index_name}"))
        .bind(index_name)
        .bind(table)
        .execute(self.pool.inner())
        .await
        .map_err(|e| map_sqlx_error(&e))?;
        info!(index = index_name, "canary experiment registered");
        Ok(())
    }

    async fn execute_ddl_with_retry(&self, ddl: &str) -> PilotResult<()> {
        let mut last = String::new();
        for attempt in 0..=self.settings.ddl_retries {
            let result = sqlx::query(ddl)
                .execute(self.pool.long_running())
                .await
                .map_err(|e| map_sqlx_error(&e));
            match result {
                Ok(_) => return Ok(()),
                Err(error) => {
                    last = error.to_string();
                    if !error.is_retryable() || attempt == self.settings.ddl_retries {
                        break;
                    }
                    let delay = Duration::from_millis(500) * 2u32.pow(attempt);
                    warn!(attempt = attempt + 1, delay_ms = delay.as_millis(), error = %error, "DDL failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Err(PilotError::DdlFailure {
            statement_kind: "create_index".to_string(),
            target: ddl.chars().take(120).collect(),
            message: last,
        })
    }

    async fn rollback_index(
        &self,
        candidate: &Prepared,
        index_name: &str,
        pre_cost: f64,
        post_cost: f64,
    ) -> PilotResult<()> {
        let drop_sql = compose_drop_index(index_name)?;
        sqlx::query(&drop_sql)
            .execute(self.pool.long_running())
            .await
            .map_err(|e| map_sqlx_error(&e))?;
        self.audit
            .record(
                MutationKind::RollbackIndex,
                candidate.tenant,
                Some(&candidate.table),
                candidate.fields.first().map(String::as_str),
                json!({
                    "index_name": index_name,
                    "reason": "post_creation_cost_regression",
                    "pre_cost": pre_cost,
                    "post_cost": post_cost,
                    "threshold_pct": self.settings.rollback_threshold_pct,
                }),
            )
            .await?;
        // A rollback is negative evidence for the utility model.
        self.scorer.model().update(
            &pilot_scoring::UtilityFeatures::from_raw(0.0, 0.0, 0.0, 0.0, 0.0),
            false,
        );
        Ok(())
    }

    /// Record one observed multi-field predicate for correlation.
    pub fn observe_predicate(&self, table: &str, fields: &[&str], _kind: QueryKind) {
        self.cooccurrence.record(table, fields);
    }

    /// Catalog field set helper used by the tenant run kind.
    ///
    /// # Errors
    /// Surfaces database errors.
    pub async fn active_fields(&self, tenant: TenantId) -> PilotResult<Vec<FieldRef>> {
        Ok(self.catalog.active_fields(tenant).await?.into_iter().collect())
    }
}

fn verdict_score(rationale: &serde_json::Value) -> f64 {
    rationale
        .get("composite_score")
        .and_then(serde_json::Value::as_f64)
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Execution {
    Created,
    RolledBack,
    Recorded,
    Denied,
}

enum PrepareOutcome {
    Ready(Prepared),
    Skipped,
    Deferred,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_sql_quotes_identifiers() {
        let sql = AutoIndexer::probe_sql("users", &["email".to_string()]);
        assert_eq!(sql, "SELECT * FROM \"users\" WHERE \"email\" = $1");
    }

    #[test]
    fn test_probe_sql_composite() {
        let sql = AutoIndexer::probe_sql(
            "users",
            &["tenant_id".to_string(), "is_active".to_string()],
        );
        assert_eq!(
            sql,
            "SELECT * FROM \"users\" WHERE \"tenant_id\" = $1 AND \"is_active\" = $2"
        );
    }

    #[test]
    fn test_verdict_score_extraction() {
        let rationale = json!({"composite_score": 4.2});
        assert!((verdict_score(&rationale) - 4.2).abs() < 1e-9);
        assert!(verdict_score(&json!({})).abs() < f64::EPSILON);
    }
}
