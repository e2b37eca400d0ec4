//! Error types for the Index Pilot engine.
//!
//! Errors fall into four classes with distinct handling policies:
//! - transient errors are retried with bounded backoff, then degraded
//! - policy denials are recorded and surfaced in status, never retried
//! - invariant violations fail the offending operation and are audited
//! - fatal errors open the circuit for the operation but never kill the
//!   process

use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`PilotError`].
pub type PilotResult<T> = Result<T, PilotError>;

/// Handling class of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry locally with bounded backoff; degrade when exhausted.
    Transient,
    /// Record and surface in status; do not retry.
    PolicyDenial,
    /// Fail the operation and write a mutation record.
    InvariantViolation,
    /// Fatal for the operation, not the process.
    Fatal,
}

/// Error type covering every component of the engine.
#[derive(Debug, Error)]
pub enum PilotError {
    /// No database session could be acquired after retries.
    #[error("connection unavailable: {message}")]
    ConnectionUnavailable {
        /// Underlying cause.
        message: String,
    },

    /// EXPLAIN could not produce a plan; callers degrade to heuristics.
    #[error("plan unavailable for template {template}: {message}")]
    PlanUnavailable {
        /// Normalized query template the plan was requested for.
        template: String,
        /// Underlying cause.
        message: String,
    },

    /// Another mutation holds the advisory lock for the target.
    #[error("lock busy for {target}")]
    LockBusy {
        /// The locked `(table, field_set)` target.
        target: String,
    },

    /// The token bucket for the operation class is exhausted.
    #[error("rate limited for {class}, retry after {retry_after:?}")]
    RateLimited {
        /// Operation class that was limited.
        class: String,
        /// Suggested wait before retrying.
        retry_after: Option<Duration>,
    },

    /// A bypass switch disables the requested feature or module.
    #[error("bypass active for {scope}: {reason}")]
    BypassActive {
        /// Scope of the active bypass.
        scope: String,
        /// Reason the bypass was set.
        reason: String,
    },

    /// The wall clock is outside the configured maintenance window.
    #[error("outside maintenance window ({window})")]
    OutsideMaintenanceWindow {
        /// Configured window description.
        window: String,
    },

    /// A per-table, per-tenant, or global budget would be exceeded.
    #[error("budget exceeded: {message}")]
    BudgetExceeded {
        /// Which budget and by how much.
        message: String,
    },

    /// The circuit breaker for the operation class is open.
    #[error("circuit breaker open for {class}")]
    BreakerOpen {
        /// Operation class whose breaker is open.
        class: String,
    },

    /// The `(table, field)` pair is not present in the catalog.
    #[error("unknown field {table}.{field}")]
    UnknownField {
        /// Table name as supplied by the caller.
        table: String,
        /// Field name as supplied by the caller.
        field: String,
    },

    /// An identifier failed syntactic or catalog validation.
    #[error("identifier rejected: {identifier}")]
    IdentifierRejected {
        /// The offending identifier, truncated for logging.
        identifier: String,
    },

    /// Catalog state contradicts itself or the database.
    #[error("catalog inconsistent: {message}")]
    CatalogInconsistent {
        /// Description of the inconsistency.
        message: String,
    },

    /// DDL failed after all retries.
    #[error("ddl failure on {statement_kind} for {target}: {message}")]
    DdlFailure {
        /// Statement kind, e.g. `create_index`.
        statement_kind: String,
        /// Target of the statement.
        target: String,
        /// Underlying cause.
        message: String,
    },

    /// The audit record could not be written.
    #[error("audit write failure: {message}")]
    AuditWriteFailure {
        /// Underlying cause.
        message: String,
    },

    /// A database call exceeded its deadline.
    #[error("deadline of {deadline:?} exceeded during {operation}")]
    DeadlineExceeded {
        /// Operation that was cancelled.
        operation: String,
        /// The deadline that was exceeded.
        deadline: Duration,
    },

    /// Generic database error not covered by a more specific variant.
    #[error("database error: {message}")]
    Database {
        /// Underlying driver message.
        message: String,
        /// Whether the driver reported the error as transient.
        retryable: bool,
    },

    /// Configuration was rejected at startup or override time.
    #[error("configuration error: {message}")]
    Configuration {
        /// What was wrong with the configuration.
        message: String,
    },

    /// Internal invariant broke; indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl PilotError {
    /// Create a [`PilotError::ConnectionUnavailable`].
    #[must_use]
    pub fn connection_unavailable(message: impl Into<String>) -> Self {
        Self::ConnectionUnavailable {
            message: message.into(),
        }
    }

    /// Create a [`PilotError::PlanUnavailable`].
    #[must_use]
    pub fn plan_unavailable(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PlanUnavailable {
            template: template.into(),
            message: message.into(),
        }
    }

    /// Create a [`PilotError::LockBusy`].
    #[must_use]
    pub fn lock_busy(target: impl Into<String>) -> Self {
        Self::LockBusy {
            target: target.into(),
        }
    }

    /// Create a [`PilotError::RateLimited`].
    #[must_use]
    pub fn rate_limited(class: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            class: class.into(),
            retry_after,
        }
    }

    /// Create a [`PilotError::BreakerOpen`].
    #[must_use]
    pub fn breaker_open(class: impl Into<String>) -> Self {
        Self::BreakerOpen {
            class: class.into(),
        }
    }

    /// Create a [`PilotError::UnknownField`].
    #[must_use]
    pub fn unknown_field(table: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            table: table.into(),
            field: field.into(),
        }
    }

    /// Create a [`PilotError::IdentifierRejected`], truncating long input.
    #[must_use]
    pub fn identifier_rejected(identifier: &str) -> Self {
        let mut shown: String = identifier.chars().take(64).collect();
        if identifier.chars().count() > 64 {
            shown.push_str("...");
        }
        Self::IdentifierRejected { identifier: shown }
    }

    /// Create a [`PilotError::Database`].
    #[must_use]
    pub fn database(message: impl Into<String>, retryable: bool) -> Self {
        Self::Database {
            message: message.into(),
            retryable,
        }
    }

    /// Create a [`PilotError::Internal`].
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a [`PilotError::Configuration`].
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Handling class of this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ConnectionUnavailable { .. }
            | Self::PlanUnavailable { .. }
            | Self::LockBusy { .. }
            | Self::RateLimited { .. }
            | Self::DeadlineExceeded { .. } => ErrorClass::Transient,
            Self::Database { retryable, .. } => {
                if *retryable {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Fatal
                }
            }
            Self::BypassActive { .. }
            | Self::OutsideMaintenanceWindow { .. }
            | Self::BudgetExceeded { .. }
            | Self::BreakerOpen { .. } => ErrorClass::PolicyDenial,
            Self::UnknownField { .. }
            | Self::IdentifierRejected { .. }
            | Self::CatalogInconsistent { .. }
            | Self::Configuration { .. } => ErrorClass::InvariantViolation,
            Self::DdlFailure { .. } | Self::AuditWriteFailure { .. } | Self::Internal { .. } => {
                ErrorClass::Fatal
            }
        }
    }

    /// Whether a local bounded retry is appropriate.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Whether the error represents a safeguard or policy denial.
    #[must_use]
    pub fn is_denial(&self) -> bool {
        self.class() == ErrorClass::PolicyDenial
    }

    /// Short stable name for audit payloads and metrics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::ConnectionUnavailable { .. } => "connection_unavailable",
            Self::PlanUnavailable { .. } => "plan_unavailable",
            Self::LockBusy { .. } => "lock_busy",
            Self::RateLimited { .. } => "rate_limited",
            Self::BypassActive { .. } => "bypass_active",
            Self::OutsideMaintenanceWindow { .. } => "outside_maintenance_window",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::BreakerOpen { .. } => "breaker_open",
            Self::UnknownField { .. } => "unknown_field",
            Self::IdentifierRejected { .. } => "identifier_rejected",
            Self::CatalogInconsistent { .. } => "catalog_inconsistent",
            Self::DdlFailure { .. } => "ddl_failure",
            Self::AuditWriteFailure { .. } => "audit_write_failure",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
            Self::Database { .. } => "database",
            Self::Configuration { .. } => "configuration",
            Self::Internal { .. } => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(PilotError::connection_unavailable("pool exhausted").is_retryable());
        assert!(PilotError::plan_unavailable("SELECT ?", "timeout").is_retryable());
        assert!(PilotError::lock_busy("users:email").is_retryable());
        assert!(PilotError::rate_limited("create_index", None).is_retryable());
    }

    #[test]
    fn test_policy_denials_are_not_retryable() {
        let err = PilotError::breaker_open("create_index");
        assert!(!err.is_retryable());
        assert!(err.is_denial());
        assert_eq!(err.class(), ErrorClass::PolicyDenial);
    }

    #[test]
    fn test_invariant_violations() {
        let err = PilotError::unknown_field("users", "ghost");
        assert_eq!(err.class(), ErrorClass::InvariantViolation);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_database_retryability_follows_driver() {
        assert!(PilotError::database("connection reset", true).is_retryable());
        assert!(!PilotError::database("syntax error", false).is_retryable());
    }

    #[test]
    fn test_identifier_rejected_truncates() {
        let long = "x".repeat(200);
        let err = PilotError::identifier_rejected(&long);
        match err {
            PilotError::IdentifierRejected { identifier } => {
                assert!(identifier.len() <= 67);
                assert!(identifier.ends_with("..."));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_kind_names_are_stable() {
        assert_eq!(
            PilotError::breaker_open("x").kind_name(),
            "breaker_open"
        );
        assert_eq!(
            PilotError::identifier_rejected("y").kind_name(),
            "identifier_rejected"
        );
    }
}
