//! # Pilot DB
//!
//! Database access for the Index Pilot engine: the bounded session pool,
//! advisory-lock primitives, and the metadata schema bootstrap.
//!
//! Everything here speaks plain parameterized SQL; identifiers are always
//! quoted through `pilot-core` after catalog validation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod advisory;
pub mod pool;
pub mod schema;

pub use advisory::{advisory_unlock, lock_key, try_advisory_lock};
pub use pool::{map_sqlx_error, PilotPool, PoolHealth, PoolStats};
pub use schema::bootstrap_metadata_schema;
