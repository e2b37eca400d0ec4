//! # Pilot Core
//!
//! Core types, traits, and error handling for the Index Pilot engine.
//!
//! This crate provides the foundational types used throughout the engine:
//! - The error taxonomy shared by every component
//! - Identifier validation and SQL quoting primitives
//! - Domain types (tenants, field references, query kinds, index kinds)
//! - The monitoring sink trait used by host integrations

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod ident;
pub mod sink;
pub mod types;

// Re-export commonly used types
pub use error::{ErrorClass, PilotError, PilotResult};
pub use ident::{quote_ident, quote_qualified, validate_identifier};
pub use sink::{AlertSeverity, MonitoringSink, NoopSink, TracingSink};
pub use types::{
    BypassScope, CorrelationId, Feature, FieldRef, IndexKind, OperationClass, QueryKind, RunKind,
    TenantId,
};
