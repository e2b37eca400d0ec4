//! Sharded bounded event buffer.
//!
//! Shards keep the critical section short under concurrent producers.
//! Each shard is a small ring capped at its slice of `max_buffer`; on
//! overflow the oldest entry in the shard is dropped and counted. Per
//! producer order is preserved within a shard between flushes; no ordering
//! holds across shards.

use crate::event::QueryEvent;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

const SHARD_COUNT: usize = 8;

/// Monotonic counters describing buffer behavior since startup.
#[derive(Debug, Default)]
pub struct TelemetryCounters {
    /// Events accepted into the buffer.
    pub accepted: AtomicU64,
    /// Events evicted because the buffer was full.
    pub dropped_overflow: AtomicU64,
    /// Events rejected because the catalog did not know the target.
    pub dropped_unknown: AtomicU64,
    /// Events written to the database.
    pub flushed: AtomicU64,
    /// Flush attempts that failed.
    pub flush_failures: AtomicU64,
}

/// Serializable snapshot of the counters plus current depth.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    /// Events accepted into the buffer.
    pub accepted: u64,
    /// Events evicted because the buffer was full.
    pub dropped_overflow: u64,
    /// Events rejected because the catalog did not know the target.
    pub dropped_unknown: u64,
    /// Events written to the database.
    pub flushed: u64,
    /// Flush attempts that failed.
    pub flush_failures: u64,
    /// Events currently buffered.
    pub buffered: usize,
}

/// The bounded multi-producer buffer.
pub struct TelemetryBuffer {
    shards: Vec<Mutex<VecDeque<QueryEvent>>>,
    shard_capacity: usize,
    next_shard: AtomicUsize,
    counters: TelemetryCounters,
}

impl TelemetryBuffer {
    /// Create a buffer bounded by `max_buffer` events in total.
    #[must_use]
    pub fn new(max_buffer: usize) -> Self {
        let shard_capacity = (max_buffer / SHARD_COUNT).max(1);
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(VecDeque::with_capacity(shard_capacity.min(1024))))
            .collect();
        Self {
            shards,
            shard_capacity,
            next_shard: AtomicUsize::new(0),
            counters: TelemetryCounters::default(),
        }
    }

    /// Append an event. Never blocks on I/O; on a full shard the oldest
    /// entry is dropped and counted.
    pub fn record(&self, event: QueryEvent) {
        let index = self.next_shard.fetch_add(1, Ordering::Relaxed) % SHARD_COUNT;
        {
            let mut shard = self.shards[index].lock();
            if shard.len() >= self.shard_capacity {
                shard.pop_front();
                self.counters.dropped_overflow.fetch_add(1, Ordering::Relaxed);
            }
            shard.push_back(event);
        }
        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an event the catalog refused. The event itself is discarded.
    pub fn record_unknown(&self) {
        self.counters.dropped_unknown.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove up to `max` events for flushing, preserving per-shard order.
    #[must_use]
    pub fn drain(&self, max: usize) -> Vec<QueryEvent> {
        let mut drained = Vec::with_capacity(max.min(self.shard_capacity * SHARD_COUNT));
        for shard in &self.shards {
            if drained.len() >= max {
                break;
            }
            let mut shard = shard.lock();
            while drained.len() < max {
                match shard.pop_front() {
                    Some(event) => drained.push(event),
                    None => break,
                }
            }
        }
        drained
    }

    /// Events currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    /// Whether the buffer holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The counters.
    #[must_use]
    pub fn counters(&self) -> &TelemetryCounters {
        &self.counters
    }

    /// Snapshot for status reporting.
    #[must_use]
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            dropped_overflow: self.counters.dropped_overflow.load(Ordering::Relaxed),
            dropped_unknown: self.counters.dropped_unknown.load(Ordering::Relaxed),
            flushed: self.counters.flushed.load(Ordering::Relaxed),
            flush_failures: self.counters.flush_failures.load(Ordering::Relaxed),
            buffered: self.len(),
        }
    }
}

impl std::fmt::Debug for TelemetryBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryBuffer")
            .field("buffered", &self.len())
            .field("shard_capacity", &self.shard_capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilot_core::QueryKind;

    fn event(n: usize) -> QueryEvent {
        QueryEvent::now(None, format!("table_{n}"), None, QueryKind::Read, 1.0)
    }

    #[test]
    fn test_record_and_drain() {
        let buffer = TelemetryBuffer::new(1000);
        for n in 0..10 {
            buffer.record(event(n));
        }
        assert_eq!(buffer.len(), 10);

        let drained = buffer.drain(100);
        assert_eq!(drained.len(), 10);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_respects_max() {
        let buffer = TelemetryBuffer::new(1000);
        for n in 0..50 {
            buffer.record(event(n));
        }
        let drained = buffer.drain(20);
        assert_eq!(drained.len(), 20);
        assert_eq!(buffer.len(), 30);
    }

    #[test]
    fn test_overflow_drops_oldest_and_counts() {
        let total = 64; // 8 per shard
        let buffer = TelemetryBuffer::new(total);
        let inputs = total * 3;
        for n in 0..inputs {
            buffer.record(event(n));
        }

        // Memory stays bounded by max_buffer.
        assert_eq!(buffer.len(), total);

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.accepted, inputs as u64);
        assert_eq!(snapshot.dropped_overflow, (inputs - total) as u64);
        // inputs == accepted; retained == accepted - dropped.
        assert_eq!(
            snapshot.accepted - snapshot.dropped_overflow,
            buffer.len() as u64
        );
    }

    #[test]
    fn test_unknown_counter() {
        let buffer = TelemetryBuffer::new(100);
        buffer.record_unknown();
        buffer.record_unknown();
        assert_eq!(buffer.snapshot().dropped_unknown, 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_concurrent_producers_never_exceed_bound() {
        let buffer = std::sync::Arc::new(TelemetryBuffer::new(128));
        let mut handles = Vec::new();
        for worker in 0..4 {
            let buffer = std::sync::Arc::clone(&buffer);
            handles.push(std::thread::spawn(move || {
                for n in 0..1000 {
                    buffer.record(event(worker * 1000 + n));
                }
            }));
        }
        for handle in handles {
            handle.join().expect("producer thread panicked");
        }
        assert!(buffer.len() <= 128);
        assert_eq!(buffer.snapshot().accepted, 4000);
    }
}
