//! Integration tests for Index Pilot
//!
//! Cross-crate scenario coverage:
//! - scoring-to-constraint pipelines over canned plans
//! - safeguard stack ordering and denial reporting
//! - interceptor decisions over canned EXPLAIN documents
//! - telemetry back-pressure under sustained load
//! - identifier safety against hostile input

pub mod fixtures;

pub use fixtures::*;

#[cfg(test)]
mod identifier_tests;
#[cfg(test)]
mod interceptor_tests;
#[cfg(test)]
mod safeguard_tests;
#[cfg(test)]
mod scoring_tests;
#[cfg(test)]
mod telemetry_tests;
