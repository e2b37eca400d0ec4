//! Interceptor scenarios over canned plans.

use crate::fixtures::*;
use pilot_engine::safety_score;
use pilot_plan::normalize_template;

#[test]
fn catastrophic_scan_is_blocked_with_named_features() {
    // S4: unanchored pattern match planned as a 5M-row seq scan at cost
    // 1.2e6. Safety collapses and both the scan and the cost feature are
    // reported.
    let plan = contacts_name_catastrophic();
    let settings = interceptor_settings();
    let (safety, features) = safety_score(&plan, &settings);

    assert!(safety < settings.min_safety, "safety was {safety}");
    assert!(features.contains(&"seq_scan".to_string()));
    assert!(features.contains(&"cost_exceeded".to_string()));
}

#[test]
fn indexed_lookup_is_safe() {
    let plan = users_email_index_scan();
    let (safety, features) = safety_score(&plan, &interceptor_settings());
    assert!((safety - 1.0).abs() < f64::EPSILON);
    assert!(features.is_empty());
}

#[test]
fn moderate_seq_scan_passes_the_floor() {
    // A 100k-row seq scan at cost 1693 is an indexing opportunity, not an
    // interception target: one feature fires but safety stays above 0.3.
    let plan = users_email_seq_scan();
    let settings = interceptor_settings();
    let (safety, features) = safety_score(&plan, &settings);
    assert!(features.contains(&"seq_scan".to_string()));
    assert!(safety >= settings.min_safety);
}

#[test]
fn identical_templates_share_one_decision_key() {
    // Determinism rests on template identity: literal differences must
    // not produce distinct cache keys.
    let a = normalize_template("SELECT * FROM contacts WHERE lower(name) LIKE '%x%'");
    let b = normalize_template("SELECT * FROM contacts WHERE lower(name) LIKE '%other%'");
    assert_eq!(a, b);

    let c = normalize_template("SELECT * FROM contacts WHERE lower(email) LIKE '%x%'");
    assert_ne!(a, c);
}

#[test]
fn fail_closed_is_opt_in() {
    let settings = interceptor_settings();
    assert!(!settings.fail_closed, "fail-open must be the default");
    assert!((settings.min_safety - 0.3).abs() < f64::EPSILON);
}
