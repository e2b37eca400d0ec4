//! Canned plans, candidates, and settings for scenario tests.

use pilot_config::{InterceptorSettings, ScoringSettings};
use pilot_core::IndexKind;
use pilot_plan::{parse_explain_json, PlanSummary};
use pilot_scoring::CandidateInputs;
use serde_json::json;

/// EXPLAIN output for `SELECT * FROM users WHERE email = $1` hitting a
/// sequential scan over a 100k-row table.
pub fn users_email_seq_scan() -> PlanSummary {
    let document = json!([{
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
    }]);
    parse_explain_json("users_email", &document).expect("fixture parses")
}

/// The same query after an index exists: a cheap index scan.
pub fn users_email_index_scan() -> PlanSummary {
    let document = json!([{
        "Plan": {
            "Node Type": "Index Scan",
            "Relation Name": "users",
            "Index Name": "pilot_idx_users_email",
            "Startup Cost": 0.29,
            "Total Cost": 8.31,
            "Plan Rows": 1.0
        }
    }]);
    parse_explain_json("users_email", &document).expect("fixture parses")
}

/// A catastrophic plan: unanchored pattern match over five million rows.
pub fn contacts_name_catastrophic() -> PlanSummary {
    let document = json!([{
        "Plan": {
            "Node Type": "Seq Scan",
            "Relation Name": "contacts",
            "Startup Cost": 0.0,
            "Total Cost": 1_200_000.0,
            "Plan Rows": 5_000_000.0
        }
    }]);
    parse_explain_json("contacts_name", &document).expect("fixture parses")
}

/// The S1-shaped candidate: hot, selective, seq-scanned.
pub fn users_email_candidate() -> CandidateInputs {
    CandidateInputs {
        table: "users".to_string(),
        fields: vec!["email".to_string()],
        query_rate_per_hour: 500.0,
        avg_duration_ms: 120.0,
        write_ratio: 0.05,
        plan_cost_without: users_email_seq_scan().total_cost,
        plan_cost_with: users_email_index_scan().total_cost,
        used_real_plan: true,
        selectivity: 1.0,
        table_rows: 100_000.0,
        build_cost: 1500.0,
        write_overhead_penalty: 100.0,
        index_kind: IndexKind::BTree,
    }
}

/// A boolean flag over a million rows: hot but unselective.
pub fn is_active_candidate() -> CandidateInputs {
    CandidateInputs {
        table: "users".to_string(),
        fields: vec!["is_active".to_string()],
        query_rate_per_hour: 10_000.0,
        avg_duration_ms: 60.0,
        write_ratio: 0.1,
        plan_cost_without: 14_000.0,
        plan_cost_with: 9_000.0,
        used_real_plan: true,
        selectivity: 2.0 / 1_000_000.0,
        table_rows: 1_000_000.0,
        build_cost: 12_000.0,
        write_overhead_penalty: 1_000.0,
        index_kind: IndexKind::BTree,
    }
}

/// Default scoring settings.
pub fn scoring_settings() -> ScoringSettings {
    ScoringSettings::default()
}

/// Default interceptor settings (`min_safety` 0.3).
pub fn interceptor_settings() -> InterceptorSettings {
    InterceptorSettings::default()
}
