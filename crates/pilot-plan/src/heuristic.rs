//! Heuristic cost estimation.
//!
//! When EXPLAIN is unavailable the scorer still has to decide. These
//! estimates use the planner's own cost constants so heuristic and
//! plan-backed numbers stay on one scale.

use crate::summary::{AccessNode, BottleneckNode, PlanSummary};
use std::collections::HashSet;

/// Planner cost of reading one page sequentially.
const SEQ_PAGE_COST: f64 = 1.0;
/// Planner cost of a random page fetch.
const RANDOM_PAGE_COST: f64 = 4.0;
/// Planner cost of processing one tuple.
const CPU_TUPLE_COST: f64 = 0.01;
/// Rows assumed per heap page when the real page count is unknown.
const ROWS_PER_PAGE: f64 = 100.0;

/// Heuristic estimator over table statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

impl HeuristicEstimator {
    /// Estimated cost of a full sequential scan.
    #[must_use]
    pub fn seq_scan_cost(row_count: f64) -> f64 {
        let pages = (row_count / ROWS_PER_PAGE).max(1.0);
        pages * SEQ_PAGE_COST + row_count * CPU_TUPLE_COST
    }

    /// Estimated cost of an index scan returning `selectivity` of the
    /// table.
    #[must_use]
    pub fn index_scan_cost(row_count: f64, selectivity: f64) -> f64 {
        let matched = (row_count * selectivity.clamp(0.0, 1.0)).max(1.0);
        let depth = row_count.max(2.0).log2().ceil();
        depth * RANDOM_PAGE_COST + matched * (CPU_TUPLE_COST + RANDOM_PAGE_COST / ROWS_PER_PAGE)
    }

    /// Estimated one-off cost of building a btree over the table.
    #[must_use]
    pub fn index_build_cost(row_count: f64) -> f64 {
        // Sort-dominated: n log n tuple handling plus a write pass.
        let rows = row_count.max(2.0);
        rows * rows.log2() * CPU_TUPLE_COST + (rows / ROWS_PER_PAGE) * SEQ_PAGE_COST
    }

    /// A synthetic summary describing an assumed sequential scan, marked
    /// heuristic so confidence is reduced downstream.
    #[must_use]
    pub fn seq_scan_summary(table: &str, row_count: f64) -> PlanSummary {
        let total_cost = Self::seq_scan_cost(row_count);
        let mut seq_scan_tables = HashSet::new();
        seq_scan_tables.insert(table.to_string());
        PlanSummary {
            total_cost,
            startup_cost: 0.0,
            estimated_rows: row_count,
            actual_rows: None,
            access_nodes: vec![AccessNode {
                node_type: "Seq Scan".to_string(),
                relation: Some(table.to_string()),
                total_cost,
                plan_rows: row_count,
            }],
            seq_scan_tables,
            buffer_hits: None,
            buffer_reads: None,
            bottleneck: Some(BottleneckNode {
                node_type: "Seq Scan".to_string(),
                relation: Some(table.to_string()),
                self_cost: total_cost,
            }),
            analyzed: false,
            heuristic: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_scan_cost_scales_with_rows() {
        let small = HeuristicEstimator::seq_scan_cost(1_000.0);
        let large = HeuristicEstimator::seq_scan_cost(1_000_000.0);
        assert!(large > small * 100.0);
    }

    #[test]
    fn test_index_beats_seq_scan_on_selective_lookup() {
        let rows = 100_000.0;
        let seq = HeuristicEstimator::seq_scan_cost(rows);
        let index = HeuristicEstimator::index_scan_cost(rows, 1.0 / rows);
        assert!(index < seq / 10.0, "index {index} should be well under seq {seq}");
    }

    #[test]
    fn test_unselective_index_is_not_much_better() {
        let rows = 100_000.0;
        let seq = HeuristicEstimator::seq_scan_cost(rows);
        let index = HeuristicEstimator::index_scan_cost(rows, 0.9);
        assert!(index > seq * 0.5);
    }

    #[test]
    fn test_heuristic_summary_is_marked() {
        let summary = HeuristicEstimator::seq_scan_summary("users", 100_000.0);
        assert!(summary.heuristic);
        assert!(summary.seq_scan_tables.contains("users"));
        assert!(summary.total_cost > 0.0);
    }
}
