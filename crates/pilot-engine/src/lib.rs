//! # Pilot Engine
//!
//! The decision and lifecycle engine: the auto-indexer orchestrator, the
//! query interceptor, scheduled lifecycle passes, and the [`Pilot`] handle
//! that hosts construct at startup and thread through their callers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod candidates;
pub mod ddl;
pub mod indexer;
pub mod interceptor;
pub mod lifecycle;
pub mod pilot;
pub mod status;
pub mod versioning;

pub use candidates::{CandidateStats, CandidateWindow};
pub use ddl::{compose_create_index, compose_drop_index, index_name_for};
pub use indexer::{AutoIndexer, PassReport};
pub use interceptor::{safety_score, BlockDetails, InterceptDecision, QueryInterceptor};
pub use lifecycle::{find_redundant, LifecycleManager, LifecycleReport};
pub use pilot::{Pilot, RunReport};
pub use status::SystemStatus;
pub use versioning::{IndexVersion, IndexVersionStore};
