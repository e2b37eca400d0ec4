//! The query interceptor.
//!
//! A pre-execution gate over the plan cache. The decision path is bounded:
//! a cache hit decides immediately, a miss gets at most the configured
//! synchronous wait before falling back to allow and counting the coverage
//! gap. Any internal failure defaults to allow unless `fail_closed` is
//! set. Identical templates against identical catalog and cache state
//! produce identical decisions.

use pilot_audit::{AuditLog, MutationKind};
use pilot_config::InterceptorSettings;
use pilot_core::CorrelationId;
use pilot_plan::{normalize_template, PlanAnalyzer, PlanSummary};
use pilot_scoring::{UtilityFeatures, UtilityModel};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Why a query was blocked, returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct BlockDetails {
    /// Human-readable reason listing the offending features.
    pub reason: String,
    /// Plan features that contributed to the block.
    pub features: Vec<String>,
    /// The computed safety score.
    pub safety_score: f64,
    /// Total plan cost.
    pub total_cost: f64,
    /// Correlation id matching the audit record.
    pub correlation_id: CorrelationId,
}

/// The interceptor's decision.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum InterceptDecision {
    /// Let the caller execute the query.
    Allow,
    /// Refuse the query.
    Block(BlockDetails),
}

impl InterceptDecision {
    /// Whether the query may run.
    #[must_use]
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Counters exposed in status.
#[derive(Debug, Clone, Serialize)]
pub struct InterceptorCounters {
    /// Queries allowed.
    pub allowed: u64,
    /// Queries blocked.
    pub blocked: u64,
    /// Decisions made without a plan (fail-open path).
    pub coverage_gaps: u64,
}

/// Compute the safety score and contributing features from a plan.
#[must_use]
pub fn safety_score(plan: &PlanSummary, settings: &InterceptorSettings) -> (f64, Vec<String>) {
    let mut score: f64 = 1.0;
    let mut features = Vec::new();

    let large_seq_scan = plan.has_seq_scan()
        && plan.estimated_rows >= settings.seq_scan_row_floor as f64;
    if large_seq_scan {
        score -= 0.4;
        features.push("seq_scan".to_string());
    }
    if plan.estimated_rows > settings.row_cap as f64 {
        score -= 0.2;
        features.push("rows_exceeded".to_string());
    }
    if plan.has_nested_loop_over_seq_scan() {
        score -= 0.2;
        features.push("nested_loop_unindexed".to_string());
    }
    if plan.total_cost > settings.cost_cap {
        score -= 0.4;
        features.push("cost_exceeded".to_string());
    }

    (score.max(0.0), features)
}

/// The interceptor.
pub struct QueryInterceptor {
    analyzer: Arc<PlanAnalyzer>,
    audit: Arc<AuditLog>,
    settings: InterceptorSettings,
    whitelist: RwLock<HashSet<String>>,
    blacklist: RwLock<HashSet<String>>,
    risk_model: UtilityModel,
    allowed: AtomicU64,
    blocked: AtomicU64,
    coverage_gaps: AtomicU64,
}

impl QueryInterceptor {
    /// Create an interceptor over the shared analyzer and ledger.
    #[must_use]
    pub fn new(
        analyzer: Arc<PlanAnalyzer>,
        audit: Arc<AuditLog>,
        settings: InterceptorSettings,
    ) -> Self {
        Self {
            analyzer,
            audit,
            settings,
            whitelist: RwLock::new(HashSet::new()),
            blacklist: RwLock::new(HashSet::new()),
            risk_model: UtilityModel::new(),
            allowed: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            coverage_gaps: AtomicU64::new(0),
        }
    }

    /// Always allow queries matching this template.
    pub fn whitelist_template(&self, sql: &str) {
        self.whitelist.write().insert(normalize_template(sql));
    }

    /// Always block queries matching this template.
    pub fn blacklist_template(&self, sql: &str) {
        self.blacklist.write().insert(normalize_template(sql));
    }

    /// The per-pattern risk model, updated by lifecycle retraining.
    #[must_use]
    pub fn risk_model(&self) -> &UtilityModel {
        &self.risk_model
    }

    /// Counters for status reporting.
    #[must_use]
    pub fn counters(&self) -> InterceptorCounters {
        InterceptorCounters {
            allowed: self.allowed.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            coverage_gaps: self.coverage_gaps.load(Ordering::Relaxed),
        }
    }

    fn allow(&self) -> InterceptDecision {
        self.allowed.fetch_add(1, Ordering::Relaxed);
        InterceptDecision::Allow
    }

    fn fail_open(&self, template: &str) -> InterceptDecision {
        self.coverage_gaps.fetch_add(1, Ordering::Relaxed);
        if self.settings.fail_closed {
            self.blocked.fetch_add(1, Ordering::Relaxed);
            let correlation_id = CorrelationId::generate();
            self.record_block(
                correlation_id,
                template,
                &["analysis_unavailable".to_string()],
                0.0,
                0.0,
            );
            InterceptDecision::Block(BlockDetails {
                reason: "plan analysis unavailable and interceptor is fail-closed".to_string(),
                features: vec!["analysis_unavailable".to_string()],
                safety_score: 0.0,
                total_cost: 0.0,
                correlation_id,
            })
        } else {
            debug!(template = %template, "no plan available, allowing");
            self.allow()
        }
    }

    fn record_block(
        &self,
        correlation_id: CorrelationId,
        template: &str,
        features: &[String],
        safety: f64,
        cost: f64,
    ) {
        // The audit write happens off the caller's path; the correlation
        // id was generated up front so the block response can carry it.
        let audit = Arc::clone(&self.audit);
        let payload = json!({
            "template": template,
            "features": features,
            "safety_score": safety,
            "total_cost": cost,
        });
        tokio::spawn(async move {
            if let Err(error) = audit
                .record_with_correlation(
                    correlation_id,
                    MutationKind::QueryBlocked,
                    None,
                    None,
                    None,
                    payload,
                )
                .await
            {
                warn!(error = %error, "failed to audit blocked query");
            }
        });
    }

    fn decide_from_plan(&self, template: &str, plan: &PlanSummary) -> InterceptDecision {
        let (heuristic_safety, features) = safety_score(plan, &self.settings);

        let safety = if self.settings.ml_refinement && self.risk_model.is_trained() {
            let risk = self.risk_model.score(&UtilityFeatures::from_raw(
                0.0,
                0.0,
                plan.estimated_rows,
                0.0,
                plan.total_cost / self.settings.cost_cap.max(1.0),
            ));
            (heuristic_safety + (1.0 - risk)) / 2.0
        } else {
            heuristic_safety
        };

        let cost_blocked = plan.total_cost > self.settings.cost_cap;
        if safety < self.settings.min_safety || cost_blocked {
            self.blocked.fetch_add(1, Ordering::Relaxed);
            let correlation_id = CorrelationId::generate();
            self.record_block(correlation_id, template, &features, safety, plan.total_cost);
            return InterceptDecision::Block(BlockDetails {
                reason: format!(
                    "query blocked ({}), safety {safety:.2} below {:.2}",
                    features.join(", "),
                    self.settings.min_safety
                ),
                features,
                safety_score: safety,
                total_cost: plan.total_cost,
                correlation_id,
            });
        }
        self.allow()
    }

    /// Decide for a query. Bounded: cache hit, or at most the configured
    /// synchronous wait for a fast plan.
    pub async fn intercept(&self, sql: &str, params: &[Option<String>]) -> InterceptDecision {
        let template = normalize_template(sql);

        if self.whitelist.read().contains(&template) {
            return self.allow();
        }
        if self.blacklist.read().contains(&template) {
            self.blocked.fetch_add(1, Ordering::Relaxed);
            let correlation_id = CorrelationId::generate();
            self.record_block(
                correlation_id,
                &template,
                &["blacklisted".to_string()],
                0.0,
                0.0,
            );
            return InterceptDecision::Block(BlockDetails {
                reason: "template is blacklisted".to_string(),
                features: vec!["blacklisted".to_string()],
                safety_score: 0.0,
                total_cost: 0.0,
                correlation_id,
            });
        }

        if let Some(plan) = self.analyzer.cached_fast(sql) {
            return self.decide_from_plan(&template, &plan);
        }

        match tokio::time::timeout(
            self.settings.max_sync_wait,
            self.analyzer.analyze_fast(sql, params),
        )
        .await
        {
            Ok(Ok(plan)) => self.decide_from_plan(&template, &plan),
            Ok(Err(_)) | Err(_) => self.fail_open(&template),
        }
    }
}

impl std::fmt::Debug for QueryInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryInterceptor")
            .field("counters", &self.counters())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilot_plan::{AccessNode, BottleneckNode};
    use std::collections::HashSet as StdHashSet;

    fn plan(cost: f64, rows: f64, seq_tables: &[&str]) -> PlanSummary {
        PlanSummary {
            total_cost: cost,
            startup_cost: 0.0,
            estimated_rows: rows,
            actual_rows: None,
            access_nodes: seq_tables
                .iter()
                .map(|t| AccessNode {
                    node_type: "Seq Scan".to_string(),
                    relation: Some((*t).to_string()),
                    total_cost: cost,
                    plan_rows: rows,
                })
                .collect(),
            seq_scan_tables: seq_tables.iter().map(|t| (*t).to_string()).collect(),
            buffer_hits: None,
            buffer_reads: None,
            bottleneck: Some(BottleneckNode {
                node_type: "Seq Scan".to_string(),
                relation: seq_tables.first().map(|t| (*t).to_string()),
                self_cost: cost,
            }),
            analyzed: false,
            heuristic: false,
        }
    }

    fn settings() -> InterceptorSettings {
        InterceptorSettings::default()
    }

    #[test]
    fn test_cheap_indexed_plan_is_safe() {
        let mut cheap = plan(8.3, 1.0, &[]);
        cheap.seq_scan_tables = StdHashSet::new();
        let (safety, features) = safety_score(&cheap, &settings());
        assert!((safety - 1.0).abs() < f64::EPSILON);
        assert!(features.is_empty());
    }

    #[test]
    fn test_catastrophic_plan_scores_low() {
        // 5M-row seq scan at cost 1.2e6: seq_scan, rows_exceeded, and
        // cost_exceeded all fire.
        let bad = plan(1_200_000.0, 5_000_000.0, &["contacts"]);
        let (safety, features) = safety_score(&bad, &settings());
        assert!(safety < 0.3, "safety was {safety}");
        assert!(features.contains(&"seq_scan".to_string()));
        assert!(features.contains(&"cost_exceeded".to_string()));
        assert!(features.contains(&"rows_exceeded".to_string()));
    }

    #[test]
    fn test_small_table_seq_scan_is_tolerated() {
        let small = plan(40.0, 500.0, &["settings"]);
        let (safety, features) = safety_score(&small, &settings());
        assert!((safety - 1.0).abs() < f64::EPSILON);
        assert!(features.is_empty());
    }

    #[test]
    fn test_safety_never_negative() {
        let terrible = plan(f64::MAX / 2.0, f64::MAX / 2.0, &["a", "b"]);
        let (safety, _) = safety_score(&terrible, &settings());
        assert!(safety >= 0.0);
    }
}
