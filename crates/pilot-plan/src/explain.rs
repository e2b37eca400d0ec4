//! EXPLAIN JSON parsing.

use crate::summary::{AccessNode, BottleneckNode, PlanSummary};
use pilot_core::{PilotError, PilotResult};
use serde_json::Value;
use std::collections::HashSet;

fn number(node: &Value, key: &str) -> Option<f64> {
    node.get(key).and_then(Value::as_f64)
}

fn integer(node: &Value, key: &str) -> Option<i64> {
    node.get(key).and_then(Value::as_i64)
}

fn text(node: &Value, key: &str) -> Option<String> {
    node.get(key)
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

struct Walker {
    nodes: Vec<AccessNode>,
    seq_scans: HashSet<String>,
    bottleneck: Option<BottleneckNode>,
}

impl Walker {
    fn walk(&mut self, node: &Value) {
        let node_type = text(node, "Node Type").unwrap_or_else(|| "Unknown".to_string());
        let relation = text(node, "Relation Name");
        let total_cost = number(node, "Total Cost").unwrap_or(0.0);
        let plan_rows = number(node, "Plan Rows").unwrap_or(0.0);

        let children = node
            .get("Plans")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let child_cost: f64 = children
            .iter()
            .map(|child| number(child, "Total Cost").unwrap_or(0.0))
            .sum();
        let self_cost = (total_cost - child_cost).max(0.0);

        if node_type == "Seq Scan" {
            if let Some(ref name) = relation {
                self.seq_scans.insert(name.clone());
            }
        }

        let beats_current = self
            .bottleneck
            .as_ref()
            .map(|current| self_cost > current.self_cost)
            .unwrap_or(true);
        if beats_current {
            self.bottleneck = Some(BottleneckNode {
                node_type: node_type.clone(),
                relation: relation.clone(),
                self_cost,
            });
        }

        self.nodes.push(AccessNode {
            node_type,
            relation,
            total_cost,
            plan_rows,
        });

        for child in &children {
            self.walk(child);
        }
    }
}

/// Parse the JSON document returned by `EXPLAIN (FORMAT JSON)` into a
/// [`PlanSummary`].
///
/// # Errors
/// Returns [`PilotError::PlanUnavailable`] when the document does not have
/// the expected shape.
pub fn parse_explain_json(template: &str, document: &Value) -> PilotResult<PlanSummary> {
    let root = document
        .as_array()
        .and_then(|entries| entries.first())
        .and_then(|entry| entry.get("Plan"))
        .ok_or_else(|| {
            PilotError::plan_unavailable(template, "EXPLAIN output missing Plan node")
        })?;

    let mut walker = Walker {
        nodes: Vec::new(),
        seq_scans: HashSet::new(),
        bottleneck: None,
    };
    walker.walk(root);

    let actual_rows = number(root, "Actual Rows");
    Ok(PlanSummary {
        total_cost: number(root, "Total Cost").unwrap_or(0.0),
        startup_cost: number(root, "Startup Cost").unwrap_or(0.0),
        estimated_rows: number(root, "Plan Rows").unwrap_or(0.0),
        actual_rows,
        access_nodes: walker.nodes,
        seq_scan_tables: walker.seq_scans,
        buffer_hits: integer(root, "Shared Hit Blocks"),
        buffer_reads: integer(root, "Shared Read Blocks"),
        bottleneck: walker.bottleneck,
        analyzed: actual_rows.is_some(),
        heuristic: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seq_scan_document() -> Value {
        json!([{
            "Plan": {
                "Node Type": "Seq Scan",
                "Relation Name": "users",
                "Startup Cost": 0.0,
                "Total Cost": 1693.0,
                "Plan Rows": 1.0,
                "Actual Rows": 1.0,
                "Shared Hit Blocks": 120,
                "Shared Read Blocks": 880
            },
            "Planning Time": 0.2,
            "Execution Time": 42.0
        }])
    }

    fn join_document() -> Value {
        json!([{
            "Plan": {
                "Node Type": "Nested Loop",
                "Startup Cost": 0.0,
                "Total Cost": 5000.0,
                "Plan Rows": 100.0,
                "Plans": [
                    {
                        "Node Type": "Seq Scan",
                        "Relation Name": "orders",
                        "Total Cost": 3500.0,
                        "Plan Rows": 10000.0
                    },
                    {
                        "Node Type": "Index Scan",
                        "Relation Name": "users",
                        "Total Cost": 8.3,
                        "Plan Rows": 1.0
                    }
                ]
            }
        }])
    }

    #[test]
    fn test_parse_simple_seq_scan() {
        let summary = parse_explain_json("SELECT", &seq_scan_document()).unwrap();
        assert!((summary.total_cost - 1693.0).abs() < 1e-9);
        assert!(summary.seq_scan_tables.contains("users"));
        assert!(summary.analyzed);
        assert_eq!(summary.buffer_hits, Some(120));
        assert!((summary.buffer_hit_ratio().unwrap() - 0.12).abs() < 1e-9);
    }

    #[test]
    fn test_parse_join_finds_bottleneck() {
        let summary = parse_explain_json("SELECT", &join_document()).unwrap();
        assert_eq!(summary.access_nodes.len(), 3);
        assert!(summary.has_nested_loop_over_seq_scan());
        assert!(!summary.analyzed);

        let bottleneck = summary.bottleneck.unwrap();
        assert_eq!(bottleneck.node_type, "Seq Scan");
        assert_eq!(bottleneck.relation.as_deref(), Some("orders"));
        assert!((bottleneck.self_cost - 3500.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_rejects_malformed_document() {
        let err = parse_explain_json("SELECT", &json!({"not": "a plan"})).unwrap_err();
        assert!(matches!(err, PilotError::PlanUnavailable { .. }));
    }

    #[test]
    fn test_bottleneck_prefers_self_cost_over_total() {
        // The nested loop's total (5000) exceeds the seq scan's total
        // (3500), but its self cost is 5000 - 3508.3, which is lower.
        let summary = parse_explain_json("SELECT", &join_document()).unwrap();
        let bottleneck = summary.bottleneck.unwrap();
        assert!(bottleneck.self_cost > 1491.0);
        assert_eq!(bottleneck.node_type, "Seq Scan");
    }
}
