//! Background flusher.
//!
//! Drains the buffer into `telemetry.events` when either the batch size or
//! the flush interval is reached, and fully on shutdown. Flushing is the
//! only telemetry path that performs I/O.

use crate::buffer::TelemetryBuffer;
use crate::event::QueryEvent;
use chrono::{DateTime, Utc};
use pilot_config::TelemetrySettings;
use pilot_core::PilotResult;
use pilot_db::{map_sqlx_error, PilotPool};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// The background flush task.
pub struct TelemetryFlusher {
    buffer: Arc<TelemetryBuffer>,
    pool: Arc<PilotPool>,
    settings: TelemetrySettings,
}

impl TelemetryFlusher {
    /// Create a flusher over the shared buffer and pool.
    #[must_use]
    pub fn new(
        buffer: Arc<TelemetryBuffer>,
        pool: Arc<PilotPool>,
        settings: TelemetrySettings,
    ) -> Self {
        Self {
            buffer,
            pool,
            settings,
        }
    }

    /// Run until shutdown is signalled, then drain the buffer.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.flush_interval.max(
            std::time::Duration::from_millis(100),
        ));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush_pending().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
            // Size-triggered flushes between ticks.
            while self.buffer.len() >= self.settings.batch_size {
                self.flush_pending().await;
            }
        }

        debug!("telemetry flusher draining on shutdown");
        while !self.buffer.is_empty() {
            self.flush_pending().await;
        }
    }

    async fn flush_pending(&self) {
        let batch = self.buffer.drain(self.settings.batch_size);
        if batch.is_empty() {
            return;
        }
        let count = batch.len();
        match insert_batch(&self.pool, &batch).await {
            Ok(()) => {
                self.buffer
                    .counters()
                    .flushed
                    .fetch_add(count as u64, Ordering::Relaxed);
                debug!(events = count, "telemetry batch flushed");
            }
            Err(error) => {
                // A failed batch is counted and dropped; producers are
                // never blocked on the database.
                self.buffer
                    .counters()
                    .flush_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(events = count, error = %error, "telemetry flush failed");
            }
        }
    }
}

/// Insert a batch of events with a single multi-row statement.
///
/// # Errors
/// Surfaces database errors.
pub async fn insert_batch(pool: &PilotPool, events: &[QueryEvent]) -> PilotResult<()> {
    if events.is_empty() {
        return Ok(());
    }

    let mut tenants: Vec<Option<i64>> = Vec::with_capacity(events.len());
    let mut tables: Vec<String> = Vec::with_capacity(events.len());
    let mut fields: Vec<Option<String>> = Vec::with_capacity(events.len());
    let mut kinds: Vec<String> = Vec::with_capacity(events.len());
    let mut durations: Vec<f64> = Vec::with_capacity(events.len());
    let mut occurred: Vec<DateTime<Utc>> = Vec::with_capacity(events.len());

    for event in events {
        tenants.push(event.tenant.map(|tenant| tenant.0));
        tables.push(event.table.clone());
        fields.push(event.field.clone());
        kinds.push(event.kind.as_str().to_string());
        durations.push(event.duration_ms);
        occurred.push(event.occurred_at);
    }

    sqlx::query(
        "INSERT INTO telemetry.events \
         (tenant_id, table_name, field_name, kind, duration_ms, occurred_at) \
         SELECT * FROM UNNEST($1::bigint[], $2::text[], $3::text[], $4::text[], \
                              $5::float8[], $6::timestamptz[])",
    )
    .bind(&tenants)
    .bind(&tables)
    .bind(&fields)
    .bind(&kinds)
    .bind(&durations)
    .bind(&occurred)
    .execute(pool.inner())
    .await
    .map_err(|e| map_sqlx_error(&e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilot_core::QueryKind;

    #[test]
    fn test_flusher_construction() {
        let buffer = Arc::new(TelemetryBuffer::new(100));
        buffer.record(QueryEvent::now(None, "users", None, QueryKind::Read, 1.0));
        // Construction alone must not touch the database.
        assert_eq!(buffer.len(), 1);
    }
}
