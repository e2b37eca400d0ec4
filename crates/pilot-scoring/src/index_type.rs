//! Index type selection.
//!
//! The query pattern and field profile decide the physical index shape:
//! equality wants a plain btree, prefix LIKE wants `text_pattern_ops`,
//! case-insensitive lookups want an expression on `lower(x)`, and a
//! predicate that always filters the same non-null condition wants a
//! partial index. Range scans on timestamps additionally get a temporal
//! partition hint.

use pilot_core::IndexKind;
use serde::{Deserialize, Serialize};

/// Aggregated access profile for one `(table, field)`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueryProfile {
    /// Share of predicates that are plain equality.
    pub equality_ratio: f64,
    /// Share of predicates that are ranges.
    pub range_ratio: f64,
    /// Share of predicates that are `LIKE 'prefix%'`.
    pub like_prefix_ratio: f64,
    /// Share of predicates wrapped in `lower()`/ILIKE.
    pub case_insensitive_ratio: f64,
    /// Every observed predicate also filtered `IS NOT NULL`.
    pub always_non_null_filter: bool,
}

/// The multiplier applied to expected benefit per index kind. Expression
/// and partial indexes serve narrower traffic, so their benefit is
/// discounted.
#[must_use]
pub fn kind_benefit_factor(kind: &IndexKind) -> f64 {
    match kind {
        IndexKind::BTree | IndexKind::Composite => 1.0,
        IndexKind::TextPattern => 0.9,
        IndexKind::LowerExpression => 0.85,
        IndexKind::Partial { .. } => 0.8,
    }
}

/// Pick the index kind for a field profile. Returns the kind and an
/// optional advisory hint recorded in the rationale.
#[must_use]
pub fn select_index_kind(
    profile: &QueryProfile,
    field_type: &str,
) -> (IndexKind, Option<String>) {
    let field_type = field_type.to_ascii_lowercase();
    let is_temporal = field_type.contains("timestamp") || field_type == "date";
    let is_text = field_type.contains("text") || field_type.contains("char");

    if is_text && profile.case_insensitive_ratio > 0.5 {
        return (IndexKind::LowerExpression, None);
    }
    if is_text && profile.like_prefix_ratio > 0.5 {
        return (IndexKind::TextPattern, None);
    }
    if profile.always_non_null_filter {
        return (
            IndexKind::Partial {
                predicate: "IS NOT NULL".to_string(),
            },
            None,
        );
    }
    if is_temporal && profile.range_ratio > 0.5 {
        return (
            IndexKind::BTree,
            Some("range-heavy timestamp access, consider temporal partitioning".to_string()),
        );
    }
    (IndexKind::BTree, None)
}
