//! Candidate selection from aggregated telemetry.

use chrono::{DateTime, Utc};
use pilot_core::{PilotResult, TenantId};
use pilot_db::{map_sqlx_error, PilotPool};
use serde::Serialize;
use sqlx::Row;
use std::time::Duration;

/// The aggregation window for one orchestrator pass. Events up to
/// `until` are incorporated; later arrivals wait for the next pass.
#[derive(Debug, Clone, Copy)]
pub struct CandidateWindow {
    /// Window start.
    pub since: DateTime<Utc>,
    /// Window end, fixed at pass start.
    pub until: DateTime<Utc>,
}

impl CandidateWindow {
    /// The trailing window ending now.
    #[must_use]
    pub fn trailing(length: Duration) -> Self {
        let until = Utc::now();
        let since = until
            - chrono::Duration::from_std(length).unwrap_or_else(|_| chrono::Duration::hours(1));
        Self { since, until }
    }

    /// Window length in hours, for rate computation.
    #[must_use]
    pub fn hours(&self) -> f64 {
        ((self.until - self.since).num_milliseconds() as f64 / 3_600_000.0).max(1e-6)
    }
}

/// Aggregated traffic for one `(tenant, table, field)`.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateStats {
    /// Tenant, when the traffic was tenant-attributed.
    pub tenant: Option<TenantId>,
    /// Target table.
    pub table: String,
    /// Target field.
    pub field: String,
    /// Read events in the window.
    pub read_count: i64,
    /// Write events in the window.
    pub write_count: i64,
    /// Mean observed latency across reads.
    pub avg_duration_ms: f64,
    /// Worst observed latency.
    pub max_duration_ms: f64,
    /// Reads per hour over the window.
    pub rate_per_hour: f64,
}

impl CandidateStats {
    /// Write share of the observed traffic.
    #[must_use]
    pub fn write_ratio(&self) -> f64 {
        let total = self.read_count + self.write_count;
        if total == 0 {
            0.0
        } else {
            self.write_count as f64 / total as f64
        }
    }
}

/// Aggregate telemetry into candidates, applying the eligibility floor on
/// reads per hour.
///
/// # Errors
/// Surfaces database errors.
pub async fn select_candidates(
    pool: &PilotPool,
    window: CandidateWindow,
    min_queries_per_hour: u64,
) -> PilotResult<Vec<CandidateStats>> {
    let rows = sqlx::query(
        "SELECT tenant_id, table_name, field_name, \
                COUNT(*) FILTER (WHERE kind = 'read') AS read_count, \
                COUNT(*) FILTER (WHERE kind = 'write') AS write_count, \
                COALESCE(AVG(duration_ms) FILTER (WHERE kind = 'read'), 0) AS avg_duration_ms, \
                COALESCE(MAX(duration_ms), 0) AS max_duration_ms \
         FROM telemetry.events \
         WHERE occurred_at >= $1 AND occurred_at < $2 AND field_name IS NOT NULL \
         GROUP BY tenant_id, table_name, field_name",
    )
    .bind(window.since)
    .bind(window.until)
    .fetch_all(pool.inner())
    .await
    .map_err(|e| map_sqlx_error(&e))?;

    let hours = window.hours();
    let mut candidates = Vec::new();
    for row in rows {
        let read_count: i64 = row.try_get("read_count").map_err(|e| map_sqlx_error(&e))?;
        let rate_per_hour = read_count as f64 / hours;
        // Strictly-below comparison: exactly the floor qualifies.
        if rate_per_hour < min_queries_per_hour as f64 {
            continue;
        }
        candidates.push(CandidateStats {
            tenant: row
                .try_get::<Option<i64>, _>("tenant_id")
                .map_err(|e| map_sqlx_error(&e))?
                .map(TenantId),
            table: row.try_get("table_name").map_err(|e| map_sqlx_error(&e))?,
            field: row.try_get("field_name").map_err(|e| map_sqlx_error(&e))?,
            read_count,
            write_count: row.try_get("write_count").map_err(|e| map_sqlx_error(&e))?,
            avg_duration_ms: row
                .try_get("avg_duration_ms")
                .map_err(|e| map_sqlx_error(&e))?,
            max_duration_ms: row
                .try_get("max_duration_ms")
                .map_err(|e| map_sqlx_error(&e))?,
            rate_per_hour,
        });
    }

    candidates.sort_by(|a, b| b.rate_per_hour.total_cmp(&a.rate_per_hour));
    Ok(candidates)
}

/// Count existing indexes per table, for the write-overhead guard and the
/// constraint optimizer.
///
/// # Errors
/// Surfaces database errors.
pub async fn existing_index_count(pool: &PilotPool, table: &str) -> PilotResult<usize> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS count FROM pg_indexes \
         WHERE schemaname = 'public' AND tablename = $1",
    )
    .bind(table)
    .fetch_one(pool.inner())
    .await
    .map_err(|e| map_sqlx_error(&e))?;
    let count: i64 = row.try_get("count").map_err(|e| map_sqlx_error(&e))?;
    Ok(count.max(0) as usize)
}

/// Approximate row count from the planner's statistics, cheap enough for
/// every pass.
///
/// # Errors
/// Surfaces database errors.
pub async fn table_row_estimate(pool: &PilotPool, table: &str) -> PilotResult<f64> {
    let row = sqlx::query(
        "SELECT COALESCE(reltuples, 0)::float8 AS rows FROM pg_class \
         WHERE relname = $1 AND relkind = 'r'",
    )
    .bind(table)
    .fetch_optional(pool.inner())
    .await
    .map_err(|e| map_sqlx_error(&e))?;
    Ok(row
        .map(|r| r.try_get::<f64, _>("rows"))
        .transpose()
        .map_err(|e| map_sqlx_error(&e))?
        .unwrap_or(0.0)
        .max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_hours() {
        let window = CandidateWindow::trailing(Duration::from_secs(3600));
        assert!((window.hours() - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_write_ratio() {
        let stats = CandidateStats {
            tenant: None,
            table: "users".to_string(),
            field: "email".to_string(),
            read_count: 90,
            write_count: 10,
            avg_duration_ms: 5.0,
            max_duration_ms: 50.0,
            rate_per_hour: 90.0,
        };
        assert!((stats.write_ratio() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_write_ratio_with_no_traffic() {
        let stats = CandidateStats {
            tenant: None,
            table: "users".to_string(),
            field: "email".to_string(),
            read_count: 0,
            write_count: 0,
            avg_duration_ms: 0.0,
            max_duration_ms: 0.0,
            rate_per_hour: 0.0,
        };
        assert!(stats.write_ratio().abs() < f64::EPSILON);
    }
}
