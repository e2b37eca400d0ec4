//! Constraint optimizer.
//!
//! The final pass over accepted candidates: per-table index budgets,
//! per-tenant budgets, and the global write-overhead ceiling must all
//! hold. Candidates are kept best-score-first; whatever does not fit is
//! dropped with a reason.

use pilot_core::TenantId;
use serde::Serialize;
use std::collections::HashMap;

/// Budgets applied by the optimizer.
#[derive(Debug, Clone, Copy)]
pub struct ConstraintBudgets {
    /// Maximum indexes per table, existing ones included.
    pub max_per_table: usize,
    /// Maximum new indexes per tenant per pass.
    pub max_per_tenant: usize,
    /// Estimated write overhead per index.
    pub overhead_per_index: f64,
    /// Ceiling on estimated cumulative write overhead across all tables.
    pub global_overhead_max: f64,
}

impl Default for ConstraintBudgets {
    fn default() -> Self {
        Self {
            max_per_table: 10,
            max_per_tenant: 5,
            overhead_per_index: 0.03,
            global_overhead_max: 1.0,
        }
    }
}

/// A candidate entering the optimizer.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetedCandidate {
    /// Tenant the candidate belongs to, when tenant-scoped.
    pub tenant: Option<TenantId>,
    /// Target table.
    pub table: String,
    /// Columns in index order.
    pub fields: Vec<String>,
    /// Composite score from the scorer.
    pub composite_score: f64,
}

/// A dropped candidate with the constraint that removed it.
#[derive(Debug, Clone, Serialize)]
pub struct DroppedCandidate {
    /// The candidate.
    pub candidate: BudgetedCandidate,
    /// Which budget it violated.
    pub reason: String,
}

/// The optimizer.
#[derive(Debug, Clone, Copy)]
pub struct ConstraintOptimizer {
    budgets: ConstraintBudgets,
}

impl ConstraintOptimizer {
    /// Create an optimizer with the given budgets.
    #[must_use]
    pub fn new(budgets: ConstraintBudgets) -> Self {
        Self { budgets }
    }

    /// Fit candidates into the budgets. `existing_counts` maps tables to
    /// their current index counts.
    #[must_use]
    pub fn optimize(
        &self,
        mut candidates: Vec<BudgetedCandidate>,
        existing_counts: &HashMap<String, usize>,
    ) -> (Vec<BudgetedCandidate>, Vec<DroppedCandidate>) {
        candidates.sort_by(|a, b| b.composite_score.total_cmp(&a.composite_score));

        let existing_total: usize = existing_counts.values().sum();
        let mut overhead = existing_total as f64 * self.budgets.overhead_per_index;
        let mut per_table: HashMap<String, usize> = existing_counts.clone();
        let mut per_tenant: HashMap<TenantId, usize> = HashMap::new();

        let mut kept = Vec::new();
        let mut dropped = Vec::new();

        for candidate in candidates {
            let table_count = per_table.get(&candidate.table).copied().unwrap_or(0);
            if table_count >= self.budgets.max_per_table {
                dropped.push(DroppedCandidate {
                    reason: format!(
                        "table {} at index budget ({})",
                        candidate.table, self.budgets.max_per_table
                    ),
                    candidate,
                });
                continue;
            }

            if let Some(tenant) = candidate.tenant {
                let tenant_count = per_tenant.get(&tenant).copied().unwrap_or(0);
                if tenant_count >= self.budgets.max_per_tenant {
                    dropped.push(DroppedCandidate {
                        reason: format!(
                            "tenant {tenant} at per-pass budget ({})",
                            self.budgets.max_per_tenant
                        ),
                        candidate,
                    });
                    continue;
                }
            }

            let projected = overhead + self.budgets.overhead_per_index;
            if projected > self.budgets.global_overhead_max {
                dropped.push(DroppedCandidate {
                    reason: format!(
                        "global write overhead {projected:.2} exceeds ceiling {:.2}",
                        self.budgets.global_overhead_max
                    ),
                    candidate,
                });
                continue;
            }

            overhead = projected;
            *per_table.entry(candidate.table.clone()).or_default() += 1;
            if let Some(tenant) = candidate.tenant {
                *per_tenant.entry(tenant).or_default() += 1;
            }
            kept.push(candidate);
        }

        (kept, dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(table: &str, field: &str, score: f64) -> BudgetedCandidate {
        BudgetedCandidate {
            tenant: Some(TenantId(1)),
            table: table.to_string(),
            fields: vec![field.to_string()],
            composite_score: score,
        }
    }

    fn optimizer() -> ConstraintOptimizer {
        ConstraintOptimizer::new(ConstraintBudgets::default())
    }

    #[test]
    fn test_everything_fits_under_budget() {
        let (kept, dropped) = optimizer().optimize(
            vec![candidate("users", "email", 5.0), candidate("orders", "status", 3.0)],
            &HashMap::new(),
        );
        assert_eq!(kept.len(), 2);
        assert!(dropped.is_empty());
    }

    #[test]
    fn test_table_budget_drops_lowest_scores() {
        let mut existing = HashMap::new();
        existing.insert("users".to_string(), 9);

        let (kept, dropped) = optimizer().optimize(
            vec![
                candidate("users", "email", 5.0),
                candidate("users", "name", 3.0),
            ],
            &existing,
        );
        // Only one slot remains under the cap of ten; the higher score
        // takes it.
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].fields, vec!["email".to_string()]);
        assert_eq!(dropped.len(), 1);
        assert!(dropped[0].reason.contains("index budget"));
    }

    #[test]
    fn test_tenant_budget() {
        let candidates: Vec<_> = (0..8)
            .map(|i| candidate("users", &format!("f{i}"), 10.0 - i as f64))
            .collect();
        let (kept, dropped) = optimizer().optimize(candidates, &HashMap::new());
        assert_eq!(kept.len(), 5);
        assert!(dropped.iter().all(|d| d.reason.contains("tenant")));
    }

    #[test]
    fn test_global_overhead_ceiling() {
        let budgets = ConstraintBudgets {
            overhead_per_index: 0.4,
            global_overhead_max: 1.0,
            max_per_table: 100,
            max_per_tenant: 100,
        };
        let optimizer = ConstraintOptimizer::new(budgets);
        let candidates: Vec<_> = (0..4)
            .map(|i| candidate(&format!("t{i}"), "f", 10.0 - i as f64))
            .collect();
        let (kept, dropped) = optimizer.optimize(candidates, &HashMap::new());
        assert_eq!(kept.len(), 2);
        assert_eq!(dropped.len(), 2);
        assert!(dropped[0].reason.contains("write overhead"));
    }

    #[test]
    fn test_untenanted_candidates_skip_tenant_budget() {
        let candidates: Vec<_> = (0..8)
            .map(|i| BudgetedCandidate {
                tenant: None,
                table: format!("t{i}"),
                fields: vec!["f".to_string()],
                composite_score: 1.0,
            })
            .collect();
        let (kept, _) = optimizer().optimize(candidates, &HashMap::new());
        assert_eq!(kept.len(), 8);
    }
}
