//! The top-level engine handle.
//!
//! Hosts construct one [`Pilot`] at startup and thread it through their
//! callers; there is no module-level global state. `start` spawns the
//! background workers, `shutdown` drains and joins them under a grace
//! deadline.

use crate::indexer::{AutoIndexer, PassReport};
use crate::interceptor::{InterceptDecision, QueryInterceptor};
use crate::lifecycle::{LifecycleManager, LifecycleReport};
use crate::status::{BreakerStatus, BypassStatus, FeatureStatus, SystemStatus};
use crate::versioning::IndexVersionStore;
use pilot_audit::{AuditLog, MutationKind};
use pilot_catalog::{compute_drift, list_columns, Catalog, FieldSpec};
use pilot_config::{
    config_bypasses, env_bypasses, BypassRegistry, PilotConfig,
};
use pilot_core::{
    BypassScope, Feature, MonitoringSink, PilotResult, QueryKind, RunKind, TenantId, TracingSink,
};
use pilot_db::{bootstrap_metadata_schema, PilotPool};
use pilot_plan::PlanAnalyzer;
use pilot_safeguards::{LockManager, SafeguardStack};
use pilot_scoring::{CandidateScorer, CooccurrenceTracker};
use pilot_telemetry::{QueryEvent, TelemetryBuffer, TelemetryFlusher};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Grace period for background workers to finish on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Result of a `run_once` invocation.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case", tag = "run")]
pub enum RunReport {
    /// An orchestrator pass.
    Analyze(PassReport),
    /// A lifecycle pass.
    Lifecycle(LifecycleReport),
    /// A tenant initialization, with the number of fields activated.
    Tenant {
        /// Fields activated for the tenant.
        activated: u64,
    },
}

/// The engine handle.
pub struct Pilot {
    config: PilotConfig,
    pool: Arc<PilotPool>,
    catalog: Arc<Catalog>,
    buffer: Arc<TelemetryBuffer>,
    analyzer: Arc<PlanAnalyzer>,
    stack: Arc<SafeguardStack>,
    locks: Arc<LockManager>,
    audit: Arc<AuditLog>,
    interceptor: Arc<QueryInterceptor>,
    indexer: Arc<AutoIndexer>,
    lifecycle: Arc<LifecycleManager>,
    bypasses: Arc<BypassRegistry>,
    sink: Arc<dyn MonitoringSink>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Pilot {
    /// Construct the engine: validate configuration, connect the pool,
    /// bootstrap the metadata schema, and assemble every component.
    ///
    /// # Errors
    /// Surfaces configuration and connection errors.
    pub async fn new(config: PilotConfig) -> PilotResult<Self> {
        Self::with_sink(config, Arc::new(TracingSink)).await
    }

    /// Construct with a host-supplied monitoring sink.
    ///
    /// # Errors
    /// Surfaces configuration and connection errors.
    pub async fn with_sink(
        config: PilotConfig,
        sink: Arc<dyn MonitoringSink>,
    ) -> PilotResult<Self> {
        config.validate()?;

        let pool = Arc::new(PilotPool::connect(&config).await?);
        bootstrap_metadata_schema(pool.inner()).await?;

        let catalog = Arc::new(Catalog::new(Arc::clone(&pool)));
        if let Err(error) = catalog.refresh_cache().await {
            warn!(error = %error, "initial catalog cache load failed, will retry on demand");
        }

        let buffer = Arc::new(TelemetryBuffer::new(config.telemetry.max_buffer));
        let analyzer = Arc::new(PlanAnalyzer::new(
            Arc::clone(&pool),
            config.plan_cache,
            config.explain,
        ));
        let scorer = Arc::new(CandidateScorer::new(
            config.scoring,
            config.indexer.threshold_multiplier,
        ));
        let stack = Arc::new(SafeguardStack::from_settings(
            &config.safeguards,
            &config.indexer,
        )?);
        let locks = Arc::new(LockManager::new(
            Arc::clone(&pool),
            config.safeguards.lock_max_age,
        ));
        let audit = Arc::new(AuditLog::new(Arc::clone(&pool)));
        let versions = Arc::new(IndexVersionStore::new(Arc::clone(&pool)));
        let cooccurrence = Arc::new(CooccurrenceTracker::new());

        let interceptor = Arc::new(QueryInterceptor::new(
            Arc::clone(&analyzer),
            Arc::clone(&audit),
            config.interceptor,
        ));
        let indexer = Arc::new(AutoIndexer::new(
            Arc::clone(&pool),
            Arc::clone(&catalog),
            Arc::clone(&analyzer),
            Arc::clone(&scorer),
            Arc::clone(&stack),
            Arc::clone(&locks),
            Arc::clone(&audit),
            Arc::clone(&cooccurrence),
            config.indexer,
            config.scoring,
        ));
        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::clone(&pool),
            Arc::clone(&locks),
            Arc::clone(&stack),
            Arc::clone(&audit),
            Arc::clone(&versions),
            Arc::clone(&scorer),
            config.lifecycle,
            config.telemetry,
            config.indexer.mode,
        ));

        let bypasses = Arc::new(BypassRegistry::new(
            env_bypasses(),
            config_bypasses(&config),
        ));

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config,
            pool,
            catalog,
            buffer,
            analyzer,
            stack,
            locks,
            audit,
            interceptor,
            indexer,
            lifecycle,
            bypasses,
            sink,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the background workers: telemetry flusher, orchestrator,
    /// lifecycle cadences, and the schema drift watcher.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        let flusher = TelemetryFlusher::new(
            Arc::clone(&self.buffer),
            Arc::clone(&self.pool),
            self.config.telemetry,
        );
        tasks.push(tokio::spawn(flusher.run(self.shutdown.subscribe())));

        // Orchestrator cadence.
        {
            let indexer = Arc::clone(&self.indexer);
            let bypasses = Arc::clone(&self.bypasses);
            let interval = self.config.indexer.interval;
            let mut shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if bypasses.feature_enabled(Feature::AutoIndexing) {
                                let _ = indexer.run_pass().await;
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        // Lifecycle cadences share one worker.
        {
            let lifecycle = Arc::clone(&self.lifecycle);
            let settings = self.config.lifecycle;
            let mut shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                let mut hourly = tokio::time::interval(settings.hourly_interval);
                let mut weekly = tokio::time::interval(settings.weekly_interval);
                let mut monthly = tokio::time::interval(settings.monthly_interval);
                hourly.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                weekly.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                monthly.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                // Skip the immediate first tick of each interval.
                hourly.tick().await;
                weekly.tick().await;
                monthly.tick().await;
                loop {
                    tokio::select! {
                        _ = hourly.tick() => { lifecycle.run_hourly().await; }
                        _ = weekly.tick() => { lifecycle.run_weekly().await; }
                        _ = monthly.tick() => { lifecycle.run_monthly().await; }
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        // Schema drift watcher.
        {
            let pool = Arc::clone(&self.pool);
            let catalog = Arc::clone(&self.catalog);
            let audit = Arc::clone(&self.audit);
            let interval = self.config.lifecycle.drift_interval;
            let mut shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(error) =
                                sync_schema_drift(&pool, &catalog, &audit).await
                            {
                                warn!(error = %error, "schema drift sync failed");
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        info!("engine workers started");
    }

    /// Record one observed query. Fire-and-forget: never blocks on I/O and
    /// never returns an error to the application.
    pub fn record_query(
        &self,
        tenant: Option<TenantId>,
        table: &str,
        field: Option<&str>,
        kind: QueryKind,
        duration_ms: f64,
    ) {
        if !self.bypasses.feature_enabled(Feature::Stats) {
            return;
        }
        if let Some(field) = field {
            // Unknown targets are counted and dropped. An unloaded cache
            // cannot answer; the event is accepted and the flush-side
            // aggregation tolerates strays.
            if self.catalog.cache().contains(table, field) == Some(false) {
                self.buffer.record_unknown();
                return;
            }
        }
        self.buffer.record(QueryEvent::now(
            tenant,
            table,
            field.map(ToString::to_string),
            kind,
            duration_ms,
        ));
    }

    /// Record a multi-field predicate observation for correlation.
    pub fn record_predicate(&self, table: &str, fields: &[&str], kind: QueryKind) {
        if self.bypasses.feature_enabled(Feature::Stats) {
            self.indexer.observe_predicate(table, fields, kind);
        }
    }

    /// Decide whether a query may execute.
    pub async fn intercept_query(
        &self,
        sql: &str,
        params: &[Option<String>],
    ) -> InterceptDecision {
        if !self.bypasses.feature_enabled(Feature::Interceptor) {
            return InterceptDecision::Allow;
        }
        self.interceptor.intercept(sql, params).await
    }

    /// Set or clear a bypass. Precedence: runtime over env over config.
    pub async fn bypass_set(&self, scope: BypassScope, enabled: bool, reason: &str) {
        self.bypasses.set(scope.clone(), enabled, reason);
        if let Err(error) = self
            .audit
            .record(
                MutationKind::SystemToggle,
                None,
                None,
                None,
                json!({
                    "action": "bypass_set",
                    "scope": scope.to_string(),
                    "enabled": enabled,
                    "reason": reason,
                }),
            )
            .await
        {
            warn!(error = %error, "failed to audit bypass change");
        }
    }

    /// Run one pass on demand.
    ///
    /// # Errors
    /// Surfaces database errors from tenant initialization; pass-level
    /// errors inside analyze/lifecycle runs are absorbed into the report.
    pub async fn run_once(&self, kind: RunKind) -> PilotResult<RunReport> {
        match kind {
            RunKind::Analyze => Ok(RunReport::Analyze(self.indexer.run_pass().await)),
            RunKind::LifecycleWeekly => {
                Ok(RunReport::Lifecycle(self.lifecycle.run_weekly().await))
            }
            RunKind::LifecycleMonthly => {
                Ok(RunReport::Lifecycle(self.lifecycle.run_monthly().await))
            }
            RunKind::Tenant(tenant) => {
                let activated = self.catalog.initialize_tenant(tenant).await?;
                self.audit
                    .record(
                        MutationKind::InitializeTenant,
                        Some(tenant),
                        None,
                        None,
                        json!({"activated_fields": activated}),
                    )
                    .await?;
                Ok(RunReport::Tenant { activated })
            }
        }
    }

    /// Bootstrap the catalog from host-declared field specs.
    ///
    /// # Errors
    /// Surfaces database errors.
    pub async fn bootstrap_catalog(&self, specs: &[FieldSpec]) -> PilotResult<(u64, u64)> {
        let counts = self.catalog.bootstrap_from_config(specs).await?;
        self.catalog.refresh_cache().await?;
        Ok(counts)
    }

    /// Discover the live schema and sync the catalog to it.
    ///
    /// # Errors
    /// Surfaces database errors.
    pub async fn sync_schema(&self) -> PilotResult<usize> {
        sync_schema_drift(&self.pool, &self.catalog, &self.audit).await
    }

    /// The current status snapshot.
    pub async fn status(&self) -> SystemStatus {
        let features = [Feature::AutoIndexing, Feature::Stats, Feature::Interceptor]
            .into_iter()
            .map(|feature| FeatureStatus {
                name: feature.to_string(),
                enabled: self.bypasses.feature_enabled(feature),
            })
            .collect();
        let bypasses = self
            .bypasses
            .snapshot()
            .into_iter()
            .map(|(scope, state, layer)| BypassStatus {
                scope,
                state,
                layer,
            })
            .collect();
        let breakers = self
            .stack
            .breakers()
            .states()
            .into_iter()
            .map(|(class, state)| BreakerStatus {
                class: class.to_string(),
                state,
            })
            .collect();

        SystemStatus {
            mode: self.config.indexer.mode,
            features,
            bypasses,
            breakers,
            coverage: self.analyzer.coverage().snapshot(),
            telemetry: self.buffer.snapshot(),
            plan_cache: self.analyzer.cache().stats(),
            pool: self.pool.stats(),
            maintenance_window: self.stack.window().in_window(),
            interceptor: self.interceptor.counters(),
            held_locks: self.locks.held_count(),
        }
    }

    /// The audit ledger, for host queries.
    #[must_use]
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// The catalog, for host policy calls.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The monitoring sink.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn MonitoringSink> {
        &self.sink
    }

    /// Signal shutdown, drain telemetry, and join workers under the grace
    /// deadline.
    pub async fn shutdown(&self) {
        info!("engine shutting down");
        let _ = self.shutdown.send(true);

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!("background worker did not stop within grace period");
            }
        }
        self.pool.close().await;
        info!("engine stopped");
    }
}

impl std::fmt::Debug for Pilot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pilot")
            .field("mode", &self.config.indexer.mode)
            .finish_non_exhaustive()
    }
}

/// Read the live schema, diff it against the genome, and apply the drift.
/// Returns the number of applied changes.
async fn sync_schema_drift(
    pool: &Arc<PilotPool>,
    catalog: &Arc<Catalog>,
    audit: &Arc<AuditLog>,
) -> PilotResult<usize> {
    let discovered = list_columns(pool).await?;
    let genome = catalog.live_descriptors().await?;
    let report = compute_drift(&genome, &discovered);
    if report.is_empty() {
        return Ok(0);
    }

    for spec in report.additions() {
        catalog.upsert_field(&spec).await?;
    }
    for field in report.removals() {
        catalog.tombstone(&field.table, &field.field).await?;
    }
    for (field, new_type) in report.type_changes() {
        catalog
            .update_field_type(&field.table, &field.field, &new_type)
            .await?;
    }
    catalog.cache().invalidate();

    let changes = report.changes.len();
    audit
        .record(
            MutationKind::SchemaSync,
            None,
            None,
            None,
            serde_json::to_value(&report).unwrap_or_default(),
        )
        .await?;
    info!(changes = changes, "schema drift applied");
    Ok(changes)
}
