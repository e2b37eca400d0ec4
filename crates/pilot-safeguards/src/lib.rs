//! # Pilot Safeguards
//!
//! The gate stack every index mutation passes through. Gates are checked
//! in a fixed order and any deny short-circuits:
//!
//! 1. lock manager (advisory lock per `(table, field_set)`)
//! 2. rate limiter (token bucket per operation class)
//! 3. CPU throttle (host CPU sample with breach cooldown)
//! 4. maintenance window (wall clock, optional)
//! 5. write-overhead guard (per-table index budget, optional)
//! 6. circuit breaker (per operation class)
//!
//! Each gate owns its own short critical section; no gate holds two locks
//! at once.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod breaker;
pub mod cpu;
pub mod locks;
pub mod rate;
pub mod stack;
pub mod window;
pub mod write_guard;

pub use breaker::{BreakerRegistry, BreakerState, CircuitBreaker};
pub use cpu::CpuThrottle;
pub use locks::{LockHandle, LockManager};
pub use rate::RateLimiter;
pub use stack::{Gate, GateDecision, GateRequest, SafeguardStack};
pub use window::MaintenanceWindow;
pub use write_guard::WriteOverheadGuard;
