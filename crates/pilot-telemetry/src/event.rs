//! The query event record.

use chrono::{DateTime, Utc};
use pilot_core::{QueryKind, TenantId};
use serde::{Deserialize, Serialize};

/// One observed query touching a specific `(table, field)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEvent {
    /// Tenant the query ran for, when known.
    pub tenant: Option<TenantId>,
    /// Host table touched.
    pub table: String,
    /// Column referenced by the predicate, when attributable.
    pub field: Option<String>,
    /// Read, write, or other.
    pub kind: QueryKind,
    /// Observed duration in milliseconds.
    pub duration_ms: f64,
    /// When the query was observed.
    pub occurred_at: DateTime<Utc>,
}

impl QueryEvent {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn now(
        tenant: Option<TenantId>,
        table: impl Into<String>,
        field: Option<String>,
        kind: QueryKind,
        duration_ms: f64,
    ) -> Self {
        Self {
            tenant,
            table: table.into(),
            field,
            kind,
            duration_ms,
            occurred_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_construction() {
        let event = QueryEvent::now(
            Some(TenantId(7)),
            "users",
            Some("email".to_string()),
            QueryKind::Read,
            12.5,
        );
        assert_eq!(event.table, "users");
        assert_eq!(event.kind, QueryKind::Read);
        assert!(event.duration_ms > 12.0);
    }
}
