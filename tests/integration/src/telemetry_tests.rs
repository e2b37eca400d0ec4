//! Telemetry back-pressure scenarios.

use pilot_core::QueryKind;
use pilot_telemetry::{QueryEvent, TelemetryBuffer};
use std::sync::Arc;

fn event(n: usize) -> QueryEvent {
    QueryEvent::now(
        None,
        "users",
        Some(format!("field_{}", n % 7)),
        QueryKind::Read,
        1.5,
    )
}

#[test]
fn sustained_overload_keeps_memory_bounded() {
    // Input far exceeds flush throughput (no flusher is running at all);
    // memory stays bounded by max_buffer and the drop accounting closes.
    let max_buffer = 1_000;
    let buffer = TelemetryBuffer::new(max_buffer);

    let inputs = 50_000u64;
    for n in 0..inputs {
        buffer.record(event(n as usize));
    }

    assert!(buffer.len() <= max_buffer);

    let snapshot = buffer.snapshot();
    assert_eq!(snapshot.accepted, inputs);
    assert_eq!(
        snapshot.dropped_overflow,
        inputs - buffer.len() as u64,
        "dropped must equal inputs minus retained"
    );
}

#[test]
fn concurrent_overload_does_not_panic_or_leak() {
    let buffer = Arc::new(TelemetryBuffer::new(512));
    let mut handles = Vec::new();
    for worker in 0..8 {
        let buffer = Arc::clone(&buffer);
        handles.push(std::thread::spawn(move || {
            for n in 0..5_000 {
                buffer.record(event(worker * 10_000 + n));
            }
        }));
    }
    for handle in handles {
        handle.join().expect("producer panicked");
    }

    assert!(buffer.len() <= 512);
    assert_eq!(buffer.snapshot().accepted, 40_000);
}

#[test]
fn drain_interleaves_with_production() {
    let buffer = TelemetryBuffer::new(1_000);
    let mut flushed_total = 0usize;
    for round in 0..100 {
        for n in 0..50 {
            buffer.record(event(round * 50 + n));
        }
        flushed_total += buffer.drain(100).len();
    }
    flushed_total += buffer.drain(usize::MAX).len();

    // Nothing was dropped at this rate, so everything drained.
    assert_eq!(flushed_total, 5_000);
    assert!(buffer.is_empty());
    assert_eq!(buffer.snapshot().dropped_overflow, 0);
}
