//! The plan summary produced from EXPLAIN output.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One plan node of interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessNode {
    /// Node type as reported, e.g. `Seq Scan`, `Index Scan`.
    pub node_type: String,
    /// Relation the node touches, when any.
    pub relation: Option<String>,
    /// Total cost of the node including children.
    pub total_cost: f64,
    /// Estimated rows out of the node.
    pub plan_rows: f64,
}

/// The most expensive node by self cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BottleneckNode {
    /// Node type as reported.
    pub node_type: String,
    /// Relation the node touches, when any.
    pub relation: Option<String>,
    /// Cost attributable to the node itself, children excluded.
    pub self_cost: f64,
}

/// Everything the engine extracts from one EXPLAIN run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    /// Total plan cost.
    pub total_cost: f64,
    /// Startup cost before the first row.
    pub startup_cost: f64,
    /// Planner row estimate at the root.
    pub estimated_rows: f64,
    /// Actual rows when the plan was executed (ANALYZE only).
    pub actual_rows: Option<f64>,
    /// Every node with its access method.
    pub access_nodes: Vec<AccessNode>,
    /// Relations read by sequential scan.
    pub seq_scan_tables: HashSet<String>,
    /// Shared buffer hits (ANALYZE with BUFFERS only).
    pub buffer_hits: Option<i64>,
    /// Shared buffer reads (ANALYZE with BUFFERS only).
    pub buffer_reads: Option<i64>,
    /// The most expensive node by self cost.
    pub bottleneck: Option<BottleneckNode>,
    /// Whether the plan came from an executed (ANALYZE) run.
    pub analyzed: bool,
    /// Whether this summary was estimated heuristically, without EXPLAIN.
    pub heuristic: bool,
}

impl PlanSummary {
    /// Whether any relation is read by sequential scan.
    #[must_use]
    pub fn has_seq_scan(&self) -> bool {
        !self.seq_scan_tables.is_empty()
    }

    /// Whether the plan contains a nested loop over a sequential scan,
    /// the signature of an unindexed join.
    #[must_use]
    pub fn has_nested_loop_over_seq_scan(&self) -> bool {
        let has_nested_loop = self
            .access_nodes
            .iter()
            .any(|node| node.node_type == "Nested Loop");
        has_nested_loop && self.has_seq_scan()
    }

    /// Buffer hit ratio, when buffer counts were captured.
    #[must_use]
    pub fn buffer_hit_ratio(&self) -> Option<f64> {
        match (self.buffer_hits, self.buffer_reads) {
            (Some(hits), Some(reads)) if hits + reads > 0 => {
                Some(hits as f64 / (hits + reads) as f64)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary_with(nodes: Vec<AccessNode>, seq: &[&str]) -> PlanSummary {
        PlanSummary {
            total_cost: 100.0,
            startup_cost: 0.0,
            estimated_rows: 10.0,
            actual_rows: None,
            access_nodes: nodes,
            seq_scan_tables: seq.iter().map(|s| (*s).to_string()).collect(),
            buffer_hits: None,
            buffer_reads: None,
            bottleneck: None,
            analyzed: false,
            heuristic: false,
        }
    }

    #[test]
    fn test_nested_loop_detection() {
        let summary = summary_with(
            vec![
                AccessNode {
                    node_type: "Nested Loop".into(),
                    relation: None,
                    total_cost: 100.0,
                    plan_rows: 10.0,
                },
                AccessNode {
                    node_type: "Seq Scan".into(),
                    relation: Some("orders".into()),
                    total_cost: 80.0,
                    plan_rows: 1000.0,
                },
            ],
            &["orders"],
        );
        assert!(summary.has_nested_loop_over_seq_scan());
        assert!(summary.has_seq_scan());
    }

    #[test]
    fn test_buffer_hit_ratio() {
        let mut summary = summary_with(vec![], &[]);
        assert_eq!(summary.buffer_hit_ratio(), None);

        summary.buffer_hits = Some(90);
        summary.buffer_reads = Some(10);
        assert!((summary.buffer_hit_ratio().unwrap() - 0.9).abs() < 1e-9);
    }
}
