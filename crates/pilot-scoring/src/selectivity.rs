//! Selectivity estimation.
//!
//! Selectivity is distinct-values over row-count. The estimator samples
//! the live value and validates it against the statistic the database
//! already keeps; when they diverge beyond tolerance the live value wins,
//! because stored statistics lag bulk loads and skewed updates.

use pilot_core::PilotResult;
use pilot_db::{map_sqlx_error, PilotPool};
use pilot_core::{quote_ident, validate_identifier};
use serde::Serialize;
use sqlx::Row;

/// Which number the estimate ultimately used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectivitySource {
    /// Fresh `COUNT(DISTINCT)` sample.
    Live,
    /// The database's stored statistic.
    Stored,
}

/// A resolved selectivity estimate.
#[derive(Debug, Clone, Serialize)]
pub struct SelectivityEstimate {
    /// Distinct values observed or estimated.
    pub distinct_values: f64,
    /// Table row count.
    pub row_count: f64,
    /// Resolved selectivity in `[0, 1]`.
    pub selectivity: f64,
    /// Where the resolved number came from.
    pub source: SelectivitySource,
}

/// Resolve live vs stored selectivity. Prefers stored when the two agree
/// within `tolerance` (relative), live otherwise.
#[must_use]
pub fn resolve_selectivity(
    live: f64,
    stored: Option<f64>,
    tolerance: f64,
) -> (f64, SelectivitySource) {
    match stored {
        Some(stored) if stored > 0.0 => {
            let divergence = (live - stored).abs() / stored;
            if divergence > tolerance {
                (live, SelectivitySource::Live)
            } else {
                (stored, SelectivitySource::Stored)
            }
        }
        _ => (live, SelectivitySource::Live),
    }
}

/// Convert the database's `n_distinct` convention to a distinct count:
/// negative values are a fraction of rows, positive values are absolute.
#[must_use]
pub fn n_distinct_to_count(n_distinct: f64, row_count: f64) -> f64 {
    if n_distinct < 0.0 {
        -n_distinct * row_count
    } else {
        n_distinct
    }
}

/// Sample live selectivity and validate it against stored statistics.
///
/// # Errors
/// Surfaces database errors; identifiers must already be catalog-validated
/// but are syntax-checked again before composition.
pub async fn estimate(
    pool: &PilotPool,
    table: &str,
    field: &str,
    tolerance: f64,
) -> PilotResult<SelectivityEstimate> {
    validate_identifier(table)?;
    validate_identifier(field)?;

    let sample_sql = format!(
        "SELECT COUNT(DISTINCT {field_q})::float8 AS distinct_values, COUNT(*)::float8 AS row_count FROM {table_q}",
        field_q = quote_ident(field),
        table_q = quote_ident(table),
    );
    let row = sqlx::query(&sample_sql)
        .fetch_one(pool.inner())
        .await
        .map_err(|e| map_sqlx_error(&e))?;
    let distinct_values: f64 = row
        .try_get("distinct_values")
        .map_err(|e| map_sqlx_error(&e))?;
    let row_count: f64 = row.try_get("row_count").map_err(|e| map_sqlx_error(&e))?;

    let live = if row_count > 0.0 {
        distinct_values / row_count
    } else {
        0.0
    };

    let stats_row = sqlx::query(
        "SELECT n_distinct::float8 AS n_distinct FROM pg_stats \
         WHERE schemaname = 'public' AND tablename = $1 AND attname = $2",
    )
    .bind(table)
    .bind(field)
    .fetch_optional(pool.inner())
    .await
    .map_err(|e| map_sqlx_error(&e))?;

    let stored = match stats_row {
        Some(stats) => {
            let n_distinct: f64 = stats.try_get("n_distinct").map_err(|e| map_sqlx_error(&e))?;
            if row_count > 0.0 {
                Some(n_distinct_to_count(n_distinct, row_count) / row_count)
            } else {
                None
            }
        }
        None => None,
    };

    let (selectivity, source) = resolve_selectivity(live, stored, tolerance);
    Ok(SelectivityEstimate {
        distinct_values,
        row_count,
        selectivity: selectivity.clamp(0.0, 1.0),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agreement_prefers_stored() {
        let (value, source) = resolve_selectivity(0.52, Some(0.50), 0.5);
        assert_eq!(source, SelectivitySource::Stored);
        assert!((value - 0.50).abs() < 1e-9);
    }

    #[test]
    fn test_divergence_prefers_live() {
        // Live says unique, stored says almost constant: trust live.
        let (value, source) = resolve_selectivity(0.9, Some(0.01), 0.5);
        assert_eq!(source, SelectivitySource::Live);
        assert!((value - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_missing_stored_uses_live() {
        let (value, source) = resolve_selectivity(0.3, None, 0.5);
        assert_eq!(source, SelectivitySource::Live);
        assert!((value - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_n_distinct_conventions() {
        // -1 means all rows distinct.
        assert!((n_distinct_to_count(-1.0, 1000.0) - 1000.0).abs() < 1e-9);
        // -0.5 means half the rows.
        assert!((n_distinct_to_count(-0.5, 1000.0) - 500.0).abs() < 1e-9);
        // Positive is an absolute count.
        assert!((n_distinct_to_count(42.0, 1000.0) - 42.0).abs() < 1e-9);
    }

    #[test]
    fn test_boolean_on_large_table() {
        // Two distinct values over a million rows: selectivity on rows is
        // microscopic even though the value-space ratio is a half.
        let live = 2.0 / 1_000_000.0;
        let (value, _) = resolve_selectivity(live, Some(live), 0.5);
        assert!(value < 1e-5);
    }
}
