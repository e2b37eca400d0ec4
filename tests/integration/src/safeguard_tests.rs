//! Safeguard stack scenarios.

use pilot_config::PilotConfig;
use pilot_core::{OperationClass, PilotError};
use pilot_db::lock_key;
use pilot_safeguards::{Gate, GateRequest, SafeguardStack};
use std::collections::HashSet;

fn permissive_stack() -> SafeguardStack {
    let mut config = PilotConfig::default();
    config.safeguards.rate_burst = 100;
    config.safeguards.rate_per_minute = 6000.0;
    SafeguardStack::from_settings(&config.safeguards, &config.indexer).unwrap()
}

fn create_request() -> GateRequest {
    GateRequest {
        class: OperationClass::CreateIndex,
        table: "users".to_string(),
        existing_index_count: 2,
    }
}

#[test]
fn permissive_stack_allows_creation() {
    let decision = permissive_stack().evaluate_with_cpu(&create_request(), Some(15.0));
    assert!(decision.allow);
}

#[test]
fn open_breaker_denies_and_names_the_gate() {
    // S2: the breaker for create_index is open; the stack denies with
    // gate circuit_breaker and the error maps to BreakerOpen.
    let stack = permissive_stack();
    let breaker = stack.breakers().breaker(OperationClass::CreateIndex);
    for _ in 0..5 {
        breaker.record_failure();
    }

    let decision = stack.evaluate_with_cpu(&create_request(), Some(15.0));
    assert!(!decision.allow);
    assert_eq!(decision.gate, Some(Gate::CircuitBreaker));

    let err = decision
        .into_result(OperationClass::CreateIndex)
        .unwrap_err();
    assert!(matches!(err, PilotError::BreakerOpen { .. }));

    // Other operation classes are unaffected.
    let drop_request = GateRequest {
        class: OperationClass::DropIndex,
        ..create_request()
    };
    assert!(stack.evaluate_with_cpu(&drop_request, Some(15.0)).allow);
}

#[test]
fn cpu_boundary_is_inclusive() {
    let stack = permissive_stack();
    assert!(stack.evaluate_with_cpu(&create_request(), Some(79.9)).allow);

    let fresh = permissive_stack();
    let decision = fresh.evaluate_with_cpu(&create_request(), Some(80.0));
    assert!(!decision.allow);
    assert_eq!(decision.gate, Some(Gate::CpuThrottle));
}

#[test]
fn concurrent_targets_share_one_lock_key() {
    // S3 foundation: every contender computes the same advisory key for
    // the same target, so the database serializes them; distinct targets
    // never collide on the keys below.
    let contenders: Vec<i64> = (0..10).map(|_| lock_key("users", &["email"])).collect();
    assert!(contenders.windows(2).all(|pair| pair[0] == pair[1]));

    let mut distinct = HashSet::new();
    distinct.insert(lock_key("users", &["email"]));
    distinct.insert(lock_key("users", &["name"]));
    distinct.insert(lock_key("contacts", &["email"]));
    distinct.insert(lock_key("users", &["email", "tenant_id"]));
    assert_eq!(distinct.len(), 4);

    // Field order does not matter for composites.
    assert_eq!(
        lock_key("users", &["email", "tenant_id"]),
        lock_key("users", &["tenant_id", "email"])
    );
}

#[test]
fn deny_order_follows_the_stack() {
    // A request violating both the write budget and the breaker reports
    // the earlier gate.
    let stack = permissive_stack();
    let breaker = stack.breakers().breaker(OperationClass::CreateIndex);
    for _ in 0..5 {
        breaker.record_failure();
    }

    let mut request = create_request();
    request.existing_index_count = 10;
    let decision = stack.evaluate_with_cpu(&request, Some(15.0));
    assert_eq!(decision.gate, Some(Gate::WriteOverheadGuard));
}
