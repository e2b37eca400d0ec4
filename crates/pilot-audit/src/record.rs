//! Mutation record types.

use chrono::{DateTime, Utc};
use pilot_core::{CorrelationId, TenantId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a recorded mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// An index was created (or would be, in advisory/dry-run mode).
    CreateIndex,
    /// An index was dropped.
    DropIndex,
    /// A created index was rolled back after verification.
    RollbackIndex,
    /// A field was enabled for a tenant.
    EnableField,
    /// A field was disabled for a tenant.
    DisableField,
    /// A tenant was registered.
    InitializeTenant,
    /// A feature or system toggle changed.
    SystemToggle,
    /// Schema drift was applied to the catalog.
    SchemaSync,
    /// A safeguard gate denied an operation.
    GateDenial,
    /// The interceptor blocked a query.
    QueryBlocked,
}

impl MutationKind {
    /// Stable lowercase name stored in the ledger.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateIndex => "create_index",
            Self::DropIndex => "drop_index",
            Self::RollbackIndex => "rollback_index",
            Self::EnableField => "enable_field",
            Self::DisableField => "disable_field",
            Self::InitializeTenant => "initialize_tenant",
            Self::SystemToggle => "system_toggle",
            Self::SchemaSync => "schema_sync",
            Self::GateDenial => "gate_denial",
            Self::QueryBlocked => "query_blocked",
        }
    }

    /// Parse from the stored string form.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "create_index" => Self::CreateIndex,
            "drop_index" => Self::DropIndex,
            "rollback_index" => Self::RollbackIndex,
            "enable_field" => Self::EnableField,
            "disable_field" => Self::DisableField,
            "initialize_tenant" => Self::InitializeTenant,
            "system_toggle" => Self::SystemToggle,
            "schema_sync" => Self::SchemaSync,
            "gate_denial" => Self::GateDenial,
            "query_blocked" => Self::QueryBlocked,
            _ => return None,
        })
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ledger row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationRecord {
    /// Ledger row id.
    pub id: i64,
    /// Correlation id shared with user-visible errors.
    pub correlation_id: CorrelationId,
    /// Tenant the mutation applied to, when tenant-scoped.
    pub tenant: Option<TenantId>,
    /// Kind of mutation.
    pub kind: MutationKind,
    /// Target table, when any.
    pub table: Option<String>,
    /// Target field, when any.
    pub field: Option<String>,
    /// Structured rationale payload.
    pub payload: serde_json::Value,
    /// When the record was written.
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            MutationKind::CreateIndex,
            MutationKind::DropIndex,
            MutationKind::RollbackIndex,
            MutationKind::EnableField,
            MutationKind::DisableField,
            MutationKind::InitializeTenant,
            MutationKind::SystemToggle,
            MutationKind::SchemaSync,
            MutationKind::GateDenial,
            MutationKind::QueryBlocked,
        ] {
            assert_eq!(MutationKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MutationKind::parse("garbage"), None);
    }

    #[test]
    fn test_record_serializes_with_snake_case_kind() {
        let record = MutationRecord {
            id: 1,
            correlation_id: CorrelationId::generate(),
            tenant: Some(TenantId(7)),
            kind: MutationKind::CreateIndex,
            table: Some("users".to_string()),
            field: Some("email".to_string()),
            payload: serde_json::json!({"confidence": 0.92}),
            occurred_at: Utc::now(),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"create_index\""));
        assert!(json.contains("\"confidence\":0.92"));
    }
}
