//! Field co-occurrence and composite candidates.
//!
//! When two fields keep appearing together in predicates, a composite
//! index can serve queries neither single-field index serves well. The
//! tracker counts pair appearances; candidates form once both the
//! co-occurrence rate and the value correlation clear their thresholds.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

/// A proposed multi-column index.
#[derive(Debug, Clone, Serialize)]
pub struct CompositeCandidate {
    /// Target table.
    pub table: String,
    /// Columns in index order: most selective first.
    pub fields: Vec<String>,
    /// Fraction of the table's observed predicates containing both fields.
    pub cooccurrence_rate: f64,
    /// Value correlation between the fields, when measured.
    pub correlation: Option<f64>,
}

/// Order two fields for a composite index: more selective column first,
/// ties broken by the higher individual co-occurrence count.
#[must_use]
pub fn order_composite_fields(
    field_a: (&str, f64, u64),
    field_b: (&str, f64, u64),
) -> Vec<String> {
    let (name_a, selectivity_a, count_a) = field_a;
    let (name_b, selectivity_b, count_b) = field_b;
    let a_first = if (selectivity_a - selectivity_b).abs() > f64::EPSILON {
        selectivity_a > selectivity_b
    } else {
        count_a >= count_b
    };
    if a_first {
        vec![name_a.to_string(), name_b.to_string()]
    } else {
        vec![name_b.to_string(), name_a.to_string()]
    }
}

#[derive(Debug, Default)]
struct TableCounts {
    total_predicates: u64,
    pair_counts: HashMap<(String, String), u64>,
    field_counts: HashMap<String, u64>,
}

/// Tracks which fields co-occur in predicates, per table.
#[derive(Debug, Default)]
pub struct CooccurrenceTracker {
    tables: Mutex<HashMap<String, TableCounts>>,
}

fn pair_key(field_a: &str, field_b: &str) -> (String, String) {
    if field_a <= field_b {
        (field_a.to_string(), field_b.to_string())
    } else {
        (field_b.to_string(), field_a.to_string())
    }
}

impl CooccurrenceTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observed predicate and the fields it referenced.
    pub fn record(&self, table: &str, fields: &[&str]) {
        if fields.is_empty() {
            return;
        }
        let mut tables = self.tables.lock();
        let counts = tables.entry(table.to_string()).or_default();
        counts.total_predicates += 1;
        for field in fields {
            *counts.field_counts.entry((*field).to_string()).or_default() += 1;
        }
        for (i, field_a) in fields.iter().enumerate() {
            for field_b in &fields[i + 1..] {
                *counts.pair_counts.entry(pair_key(field_a, field_b)).or_default() += 1;
            }
        }
    }

    /// Co-occurrence rate for a pair: pair count over total predicates.
    #[must_use]
    pub fn cooccurrence_rate(&self, table: &str, field_a: &str, field_b: &str) -> f64 {
        let tables = self.tables.lock();
        let Some(counts) = tables.get(table) else {
            return 0.0;
        };
        if counts.total_predicates == 0 {
            return 0.0;
        }
        let pairs = counts
            .pair_counts
            .get(&pair_key(field_a, field_b))
            .copied()
            .unwrap_or(0);
        pairs as f64 / counts.total_predicates as f64
    }

    /// Individual appearance count for a field.
    #[must_use]
    pub fn field_count(&self, table: &str, field: &str) -> u64 {
        let tables = self.tables.lock();
        tables
            .get(table)
            .and_then(|counts| counts.field_counts.get(field))
            .copied()
            .unwrap_or(0)
    }

    /// Pairs on a table whose co-occurrence rate clears the threshold.
    #[must_use]
    pub fn pairs_above(&self, table: &str, threshold: f64) -> Vec<(String, String, f64)> {
        let tables = self.tables.lock();
        let Some(counts) = tables.get(table) else {
            return Vec::new();
        };
        if counts.total_predicates == 0 {
            return Vec::new();
        }
        let total = counts.total_predicates as f64;
        let mut pairs: Vec<(String, String, f64)> = counts
            .pair_counts
            .iter()
            .filter_map(|((a, b), count)| {
                let rate = *count as f64 / total;
                (rate >= threshold).then(|| (a.clone(), b.clone(), rate))
            })
            .collect();
        pairs.sort_by(|x, y| y.2.total_cmp(&x.2));
        pairs
    }

    /// Forget everything recorded for a table.
    pub fn reset_table(&self, table: &str) {
        self.tables.lock().remove(table);
    }
}
