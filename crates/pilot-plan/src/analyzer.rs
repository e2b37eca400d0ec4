//! The plan analyzer.
//!
//! Obtains plans through `EXPLAIN (ANALYZE, BUFFERS, FORMAT JSON)` for the
//! full path and `EXPLAIN (FORMAT JSON)` for the fast path. Fast-path
//! results are cached by normalized template under a per-key singleflight.
//! Transient failures retry with bounded backoff; on permanent failure the
//! caller receives `PlanUnavailable` and must degrade to heuristics.

use crate::cache::PlanCache;
use crate::coverage::CoverageTracker;
use crate::explain::parse_explain_json;
use crate::summary::PlanSummary;
use crate::template::normalize_template;
use pilot_config::{ExplainSettings, PlanCacheSettings};
use pilot_core::{PilotError, PilotResult};
use pilot_db::{map_sqlx_error, PilotPool};
use sqlx::Row;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const EXPLAIN_ATTEMPTS: u32 = 3;
const EXPLAIN_BASE_DELAY: Duration = Duration::from_millis(100);

/// Replace NULL bind parameters with an empty-string sentinel so the
/// planner never sees an untyped NULL.
#[must_use]
pub fn sanitize_params(params: &[Option<String>]) -> Vec<String> {
    params
        .iter()
        .map(|param| param.clone().unwrap_or_default())
        .collect()
}

/// EXPLAIN-backed plan analysis with caching and fallback accounting.
pub struct PlanAnalyzer {
    pool: Arc<PilotPool>,
    cache: PlanCache,
    coverage: Arc<CoverageTracker>,
}

impl PlanAnalyzer {
    /// Create an analyzer over the shared pool.
    #[must_use]
    pub fn new(
        pool: Arc<PilotPool>,
        cache_settings: PlanCacheSettings,
        explain_settings: ExplainSettings,
    ) -> Self {
        Self {
            pool,
            cache: PlanCache::new(cache_settings),
            coverage: Arc::new(CoverageTracker::new(explain_settings.min_coverage)),
        }
    }

    /// The coverage tracker, shared with the scorer.
    #[must_use]
    pub fn coverage(&self) -> Arc<CoverageTracker> {
        Arc::clone(&self.coverage)
    }

    /// The plan cache.
    #[must_use]
    pub fn cache(&self) -> &PlanCache {
        &self.cache
    }

    /// Full plan: executes the query under ANALYZE with BUFFERS. Not
    /// cached; execution-time numbers go stale immediately.
    ///
    /// # Errors
    /// Returns [`PilotError::PlanUnavailable`] after exhausted retries.
    pub async fn analyze_full(
        &self,
        sql: &str,
        params: &[Option<String>],
    ) -> PilotResult<PlanSummary> {
        self.run_explain("EXPLAIN (ANALYZE, BUFFERS, FORMAT JSON)", sql, params)
            .await
    }

    /// Fast plan: plan-only, cached by normalized template.
    ///
    /// # Errors
    /// Returns [`PilotError::PlanUnavailable`] after exhausted retries.
    pub async fn analyze_fast(
        &self,
        sql: &str,
        params: &[Option<String>],
    ) -> PilotResult<PlanSummary> {
        let template = normalize_template(sql);
        self.cache
            .get_or_compute(&template, || async {
                self.run_explain("EXPLAIN (FORMAT JSON)", sql, params).await
            })
            .await
    }

    /// Cached fast-path lookup without computing on miss. Used by callers
    /// with a hard synchronous budget.
    #[must_use]
    pub fn cached_fast(&self, sql: &str) -> Option<PlanSummary> {
        self.cache.get(&normalize_template(sql))
    }

    async fn run_explain(
        &self,
        prefix: &str,
        sql: &str,
        params: &[Option<String>],
    ) -> PilotResult<PlanSummary> {
        let template = normalize_template(sql);
        let explain_sql = format!("{prefix} {sql}");
        let sanitized = sanitize_params(params);

        let mut last_message = String::new();
        for attempt in 0..EXPLAIN_ATTEMPTS {
            match self.execute_explain(&explain_sql, &sanitized).await {
                Ok(document) => {
                    let summary = parse_explain_json(&template, &document)?;
                    debug!(
                        template = %template,
                        cost = summary.total_cost,
                        attempt = attempt,
                        "plan obtained"
                    );
                    return Ok(summary);
                }
                Err(error) => {
                    last_message = error.to_string();
                    if !error.is_retryable() || attempt + 1 == EXPLAIN_ATTEMPTS {
                        break;
                    }
                    let delay = EXPLAIN_BASE_DELAY * 2u32.pow(attempt);
                    warn!(
                        template = %template,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "EXPLAIN failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(PilotError::plan_unavailable(template, last_message))
    }

    async fn execute_explain(
        &self,
        explain_sql: &str,
        params: &[String],
    ) -> PilotResult<serde_json::Value> {
        let pool = Arc::clone(&self.pool);
        self.pool
            .with_deadline("explain", async move {
                let mut query = sqlx::query(explain_sql);
                for param in params {
                    query = query.bind(param);
                }
                let row = query
                    .fetch_one(pool.inner())
                    .await
                    .map_err(|e| map_sqlx_error(&e))?;
                row.try_get::<serde_json::Value, _>(0)
                    .map_err(|e| map_sqlx_error(&e))
            })
            .await
    }

    /// Record that a decision used a real plan.
    pub fn record_plan_backed(&self) {
        self.coverage.record_plan_backed();
    }

    /// Record that a decision fell back to heuristics.
    pub fn record_heuristic(&self) {
        self.coverage.record_heuristic();
    }
}

impl std::fmt::Debug for PlanAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanAnalyzer")
            .field("cache", &self.cache)
            .finish()
    }
}
