//! Schema discovery and drift detection.
//!
//! The database's `information_schema` is the ground truth for what host
//! columns exist. Discovery reads it; drift compares it to the genome and
//! produces the additions, removals, and type changes the store then
//! applies.

use crate::types::{FieldDescriptor, FieldSpec};
use pilot_core::{FieldRef, PilotResult};
use pilot_db::{map_sqlx_error, PilotPool};
use serde::Serialize;
use sqlx::Row;
use std::collections::HashMap;

/// One column as reported by the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredColumn {
    /// Table name within the public host schema.
    pub table: String,
    /// Column name.
    pub column: String,
    /// Reported data type.
    pub data_type: String,
    /// Whether the column is nullable.
    pub is_nullable: bool,
}

/// One drift change, for audit payloads.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "change")]
pub enum DriftChange {
    /// A column appeared that the genome lacks.
    Added {
        /// The new pair.
        field: FieldRef,
        /// Its reported type.
        data_type: String,
    },
    /// A genome column disappeared from the database.
    Removed {
        /// The vanished pair.
        field: FieldRef,
    },
    /// A column's type changed.
    TypeChanged {
        /// The affected pair.
        field: FieldRef,
        /// Type recorded in the genome.
        old_type: String,
        /// Type now reported by the database.
        new_type: String,
    },
}

/// Result of a drift comparison.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DriftReport {
    /// All detected changes.
    pub changes: Vec<DriftChange>,
}

impl DriftReport {
    /// Whether anything drifted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Specs for columns to add to the genome.
    #[must_use]
    pub fn additions(&self) -> Vec<FieldSpec> {
        self.changes
            .iter()
            .filter_map(|change| match change {
                DriftChange::Added { field, data_type } => Some(FieldSpec {
                    table: field.table.clone(),
                    field: field.field.clone(),
                    field_type: data_type.clone(),
                    is_required: false,
                    is_indexable: true,
                    default_active: false,
                    group: None,
                }),
                _ => None,
            })
            .collect()
    }

    /// Pairs to tombstone.
    #[must_use]
    pub fn removals(&self) -> Vec<FieldRef> {
        self.changes
            .iter()
            .filter_map(|change| match change {
                DriftChange::Removed { field } => Some(field.clone()),
                _ => None,
            })
            .collect()
    }

    /// Pairs whose declared type must be refreshed.
    #[must_use]
    pub fn type_changes(&self) -> Vec<(FieldRef, String)> {
        self.changes
            .iter()
            .filter_map(|change| match change {
                DriftChange::TypeChanged {
                    field, new_type, ..
                } => Some((field.clone(), new_type.clone())),
                _ => None,
            })
            .collect()
    }
}

/// Read every host column from `information_schema`.
///
/// # Errors
/// Surfaces database errors.
pub async fn list_columns(pool: &PilotPool) -> PilotResult<Vec<DiscoveredColumn>> {
    let rows = sqlx::query(
        "SELECT table_name, column_name, data_type, is_nullable \
         FROM information_schema.columns \
         WHERE table_schema = 'public' \
         ORDER BY table_name, ordinal_position",
    )
    .fetch_all(pool.inner())
    .await
    .map_err(|e| map_sqlx_error(&e))?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        // Only the public host schema is read, so the engine's own
        // metadata schemas never enter the genome.
        let table: String = row.try_get("table_name").map_err(|e| map_sqlx_error(&e))?;
        let nullable: String = row.try_get("is_nullable").map_err(|e| map_sqlx_error(&e))?;
        columns.push(DiscoveredColumn {
            table,
            column: row.try_get("column_name").map_err(|e| map_sqlx_error(&e))?,
            data_type: row.try_get("data_type").map_err(|e| map_sqlx_error(&e))?,
            is_nullable: nullable.eq_ignore_ascii_case("yes"),
        });
    }
    Ok(columns)
}

/// Compare the live schema against the genome.
#[must_use]
pub fn compute_drift(
    genome: &[FieldDescriptor],
    discovered: &[DiscoveredColumn],
) -> DriftReport {
    let mut live: HashMap<FieldRef, &DiscoveredColumn> = HashMap::new();
    for column in discovered {
        live.insert(FieldRef::new(&column.table, &column.column), column);
    }

    let mut changes = Vec::new();

    for descriptor in genome {
        let key = FieldRef::new(&descriptor.table, &descriptor.field);
        match live.remove(&key) {
            None => changes.push(DriftChange::Removed { field: key }),
            Some(column) => {
                if !column.data_type.eq_ignore_ascii_case(&descriptor.field_type) {
                    changes.push(DriftChange::TypeChanged {
                        field: key,
                        old_type: descriptor.field_type.clone(),
                        new_type: column.data_type.clone(),
                    });
                }
            }
        }
    }

    // Whatever remains was never in the genome.
    for (field, column) in live {
        changes.push(DriftChange::Added {
            field,
            data_type: column.data_type.clone(),
        });
    }

    DriftReport { changes }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(table: &str, field: &str, field_type: &str) -> FieldDescriptor {
        FieldDescriptor {
            table: table.into(),
            field: field.into(),
            field_type: field_type.into(),
            is_required: false,
            is_indexable: true,
            default_active: false,
            group: None,
            tombstoned_at: None,
        }
    }

    fn column(table: &str, column_name: &str, data_type: &str) -> DiscoveredColumn {
        DiscoveredColumn {
            table: table.into(),
            column: column_name.into(),
            data_type: data_type.into(),
            is_nullable: true,
        }
    }

    #[test]
    fn test_no_drift_for_identical_state() {
        let genome = vec![descriptor("users", "email", "text")];
        let discovered = vec![column("users", "email", "text")];
        assert!(compute_drift(&genome, &discovered).is_empty());
    }

    #[test]
    fn test_addition_detected() {
        let genome = vec![descriptor("users", "email", "text")];
        let discovered = vec![
            column("users", "email", "text"),
            column("users", "phone", "text"),
        ];
        let report = compute_drift(&genome, &discovered);
        let additions = report.additions();
        assert_eq!(additions.len(), 1);
        assert_eq!(additions[0].field, "phone");
        assert!(additions[0].is_indexable);
        assert!(!additions[0].default_active);
    }

    #[test]
    fn test_removal_detected() {
        let genome = vec![
            descriptor("users", "email", "text"),
            descriptor("users", "legacy", "text"),
        ];
        let discovered = vec![column("users", "email", "text")];
        let report = compute_drift(&genome, &discovered);
        assert_eq!(report.removals(), vec![FieldRef::new("users", "legacy")]);
    }

    #[test]
    fn test_type_change_detected() {
        let genome = vec![descriptor("users", "age", "integer")];
        let discovered = vec![column("users", "age", "bigint")];
        let report = compute_drift(&genome, &discovered);
        let changes = report.type_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].1, "bigint");
    }

    #[test]
    fn test_type_comparison_is_case_insensitive() {
        let genome = vec![descriptor("users", "email", "TEXT")];
        let discovered = vec![column("users", "email", "text")];
        assert!(compute_drift(&genome, &discovered).is_empty());
    }
}
