//! Catalog row types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the field genome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Host table name.
    pub table: String,
    /// Column name.
    pub field: String,
    /// Declared SQL type.
    pub field_type: String,
    /// NOT NULL in the host schema.
    pub is_required: bool,
    /// Policy flag: the engine may index this field.
    pub is_indexable: bool,
    /// Enabled for newly registered tenants.
    pub default_active: bool,
    /// Free-form category.
    pub group: Option<String>,
    /// Set when the column disappeared from the host schema.
    pub tombstoned_at: Option<DateTime<Utc>>,
}

impl FieldDescriptor {
    /// Whether the field may currently be acted on.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.is_indexable && self.tombstoned_at.is_none()
    }
}

/// Bootstrap input describing one field, as supplied by host configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Host table name.
    pub table: String,
    /// Column name.
    pub field: String,
    /// Declared SQL type.
    pub field_type: String,
    /// NOT NULL in the host schema.
    #[serde(default)]
    pub is_required: bool,
    /// Policy flag: the engine may index this field.
    #[serde(default = "default_true")]
    pub is_indexable: bool,
    /// Enabled for newly registered tenants.
    #[serde(default)]
    pub default_active: bool,
    /// Free-form category.
    #[serde(default)]
    pub group: Option<String>,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tombstoned_field_is_not_live() {
        let mut descriptor = FieldDescriptor {
            table: "users".into(),
            field: "email".into(),
            field_type: "text".into(),
            is_required: false,
            is_indexable: true,
            default_active: true,
            group: None,
            tombstoned_at: None,
        };
        assert!(descriptor.is_live());

        descriptor.tombstoned_at = Some(Utc::now());
        assert!(!descriptor.is_live());
    }

    #[test]
    fn test_field_spec_defaults() {
        let spec: FieldSpec = serde_json::from_str(
            r#"{"table": "users", "field": "email", "field_type": "text"}"#,
        )
        .unwrap();
        assert!(spec.is_indexable);
        assert!(!spec.default_active);
        assert!(!spec.is_required);
    }
}
