//! # Pilot Telemetry
//!
//! High-rate, bounded collection of per-field query events.
//!
//! The foreground `record` path appends under a short per-shard critical
//! section and never touches I/O; a background flusher batches events into
//! `telemetry.events`. Overflow drops the oldest entries and counts them
//! rather than erroring.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod buffer;
pub mod event;
pub mod flusher;

pub use buffer::{TelemetryBuffer, TelemetryCounters, TelemetrySnapshot};
pub use event::QueryEvent;
pub use flusher::{insert_batch, TelemetryFlusher};
