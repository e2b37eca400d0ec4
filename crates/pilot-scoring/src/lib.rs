//! # Pilot Scoring
//!
//! Decides whether an index candidate is worth creating. Combines the
//! heuristic benefit/cost ratio with an optional learned utility score,
//! modulated by selectivity, field correlation, index-type fit, and the
//! budget constraints applied as a final pass.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod constraints;
pub mod correlation;
pub mod index_type;
pub mod predictive;
pub mod scorer;
pub mod selectivity;

pub use constraints::{
    BudgetedCandidate, ConstraintBudgets, ConstraintOptimizer, DroppedCandidate,
};
pub use correlation::{order_composite_fields, CompositeCandidate, CooccurrenceTracker};
pub use index_type::{kind_benefit_factor, select_index_kind, QueryProfile};
pub use predictive::{UtilityFeatures, UtilityModel};
pub use scorer::{CandidateInputs, CandidateScorer, ScoreRationale, Verdict};
pub use selectivity::{
    estimate as estimate_selectivity, n_distinct_to_count, resolve_selectivity,
    SelectivityEstimate, SelectivitySource,
};
