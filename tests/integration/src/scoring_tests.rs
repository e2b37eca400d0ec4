//! Scoring pipeline scenarios.

use crate::fixtures::*;
use pilot_core::{IndexKind, TenantId};
use pilot_scoring::{
    order_composite_fields, BudgetedCandidate, CandidateScorer, ConstraintBudgets,
    ConstraintOptimizer, CooccurrenceTracker, Verdict,
};
use std::collections::HashMap;

#[test]
fn hot_selective_seq_scan_is_accepted_with_high_confidence() {
    let scorer = CandidateScorer::new(scoring_settings(), 1.0);
    match scorer.score(&users_email_candidate()) {
        Verdict::Accept {
            confidence,
            rationale,
        } => {
            assert!(confidence >= 0.8, "confidence {confidence}");
            assert!(rationale.expected_benefit > 0.0);
            // Post-index cost is far below the seq scan's.
            assert!(rationale.composite_score > rationale.threshold);
        }
        other => panic!("expected accept: {other:?}"),
    }
}

#[test]
fn boolean_flag_is_rejected_alone_but_considered_composite() {
    let scorer = CandidateScorer::new(scoring_settings(), 1.0);

    // Alone: the value-space looks fine (two values out of two), but the
    // row-space selectivity is microscopic and the floor rejects it.
    match scorer.score(&is_active_candidate()) {
        Verdict::Reject { reason, .. } => assert!(reason.contains("selectivity")),
        other => panic!("expected reject: {other:?}"),
    }

    // As part of a composite led by tenant_id the floor no longer
    // applies.
    let mut composite = is_active_candidate();
    composite.fields = vec!["tenant_id".to_string(), "is_active".to_string()];
    composite.index_kind = IndexKind::Composite;
    composite.selectivity = 0.001;
    let verdict = scorer.score(&composite);
    assert!(
        !matches!(&verdict, Verdict::Reject { reason, .. } if reason.contains("selectivity")),
        "composite should not hit the selectivity floor: {verdict:?}"
    );
}

#[test]
fn composite_candidate_forms_only_with_cooccurrence_support() {
    let tracker = CooccurrenceTracker::new();
    // tenant_id and is_active co-occur in most predicates.
    for _ in 0..70 {
        tracker.record("users", &["tenant_id", "is_active"]);
    }
    for _ in 0..30 {
        tracker.record("users", &["email"]);
    }

    let pairs = tracker.pairs_above("users", 0.3);
    assert_eq!(pairs.len(), 1);
    assert!((pairs[0].2 - 0.7).abs() < 1e-9);

    // Ordering: the more selective column leads.
    let ordered = order_composite_fields(
        ("tenant_id", 0.001, tracker.field_count("users", "tenant_id")),
        ("is_active", 0.000002, tracker.field_count("users", "is_active")),
    );
    assert_eq!(ordered[0], "tenant_id");

    // Without support, no pair clears the threshold.
    let sparse = CooccurrenceTracker::new();
    for _ in 0..99 {
        sparse.record("users", &["email"]);
    }
    sparse.record("users", &["tenant_id", "is_active"]);
    assert!(sparse.pairs_above("users", 0.3).is_empty());
}

#[test]
fn raising_threshold_never_accepts_a_rejected_candidate() {
    let candidate = users_email_candidate();
    let mut previously_accepted = true;
    for multiplier in [0.1, 1.0, 100.0, 10_000.0, 1_000_000.0] {
        let scorer = CandidateScorer::new(scoring_settings(), multiplier);
        let accepted = scorer.score(&candidate).is_accept();
        assert!(
            accepted <= previously_accepted,
            "acceptance flipped on at multiplier {multiplier}"
        );
        previously_accepted = accepted;
    }
}

#[test]
fn constraint_pass_respects_budgets_end_to_end() {
    let scorer = CandidateScorer::new(scoring_settings(), 1.0);
    let accepted_score = match scorer.score(&users_email_candidate()) {
        Verdict::Accept { rationale, .. } => rationale.composite_score,
        other => panic!("expected accept: {other:?}"),
    };

    // The table already sits at its budget; the optimizer must drop the
    // candidate no matter how well it scored.
    let mut existing = HashMap::new();
    existing.insert("users".to_string(), 10);
    let optimizer = ConstraintOptimizer::new(ConstraintBudgets::default());
    let (kept, dropped) = optimizer.optimize(
        vec![BudgetedCandidate {
            tenant: Some(TenantId(1)),
            table: "users".to_string(),
            fields: vec!["email".to_string()],
            composite_score: accepted_score,
        }],
        &existing,
    );
    assert!(kept.is_empty());
    assert_eq!(dropped.len(), 1);
    assert!(dropped[0].reason.contains("budget"));
}
