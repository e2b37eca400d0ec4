//! # Pilot Catalog
//!
//! The engine's metadata authority: which fields exist (the genome), which
//! are live per tenant (the expression), and how both stay consistent with
//! the actual database schema.
//!
//! The catalog is the sole source of truth for what the engine may touch.
//! Identifier validation consults only catalog state, and an empty catalog
//! rejects everything.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod discovery;
pub mod store;
pub mod types;

pub use cache::CatalogCache;
pub use discovery::{compute_drift, list_columns, DiscoveredColumn, DriftChange, DriftReport};
pub use store::{Catalog, UpsertOutcome};
pub use types::{FieldDescriptor, FieldSpec};
