//! Shared domain types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Tenant identifier as stored in host tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub i64);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A `(table, field)` pair, the unit the engine reasons about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldRef {
    /// Host table name.
    pub table: String,
    /// Column name within the table.
    pub field: String,
}

impl FieldRef {
    /// Create a new field reference.
    #[must_use]
    pub fn new(table: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.field)
    }
}

/// Kind of an observed query event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// SELECT-shaped traffic.
    Read,
    /// INSERT/UPDATE/DELETE traffic.
    Write,
    /// Anything else (DDL, COPY, utility statements).
    Other,
}

impl QueryKind {
    /// Stable lowercase name used in SQL and payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Other => "other",
        }
    }

    /// Parse from the stored string form.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "read" => Self::Read,
            "write" => Self::Write,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical index shape chosen for a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Plain btree, the default for equality and range predicates.
    BTree,
    /// Expression index with `text_pattern_ops` for prefix LIKE.
    TextPattern,
    /// Expression index on `lower(column)` for case-insensitive lookups.
    LowerExpression,
    /// Partial index with a WHERE clause.
    Partial {
        /// Predicate body, already validated and composed.
        predicate: String,
    },
    /// Multi-column btree produced by the correlation pass.
    Composite,
}

impl IndexKind {
    /// Stable name used in rationale payloads.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::BTree => "btree",
            Self::TextPattern => "text_pattern",
            Self::LowerExpression => "lower_expression",
            Self::Partial { .. } => "partial",
            Self::Composite => "composite",
        }
    }
}

/// Operation classes used by rate limiting and circuit breaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    /// Index creation DDL.
    CreateIndex,
    /// Index removal DDL.
    DropIndex,
    /// Plan analysis via EXPLAIN.
    Explain,
    /// Lifecycle maintenance operations.
    Maintenance,
    /// Catalog and schema synchronization.
    SchemaSync,
}

impl OperationClass {
    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateIndex => "create_index",
            Self::DropIndex => "drop_index",
            Self::Explain => "explain",
            Self::Maintenance => "maintenance",
            Self::SchemaSync => "schema_sync",
        }
    }

    /// All classes, for registry initialization.
    #[must_use]
    pub fn all() -> [Self; 5] {
        [
            Self::CreateIndex,
            Self::DropIndex,
            Self::Explain,
            Self::Maintenance,
            Self::SchemaSync,
        ]
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feature groups that can be toggled or bypassed at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// The auto-indexer orchestrator.
    AutoIndexing,
    /// Telemetry collection and statistics.
    Stats,
    /// The query interceptor.
    Interceptor,
}

impl Feature {
    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AutoIndexing => "auto_indexing",
            Self::Stats => "stats",
            Self::Interceptor => "interceptor",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scope of a bypass switch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum BypassScope {
    /// A single feature group.
    Feature(Feature),
    /// A named module.
    Module(String),
    /// The whole system.
    System,
    /// Startup-time bypass, cleared once initialization completes.
    Startup,
}

impl fmt::Display for BypassScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Feature(feature) => write!(f, "feature:{feature}"),
            Self::Module(module) => write!(f, "module:{module}"),
            Self::System => f.write_str("system"),
            Self::Startup => f.write_str("startup"),
        }
    }
}

/// Kind of an on-demand engine run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// A single orchestrator analysis pass.
    Analyze,
    /// The weekly lifecycle sweep.
    LifecycleWeekly,
    /// The monthly lifecycle sweep.
    LifecycleMonthly,
    /// Initialize or re-evaluate a single tenant.
    Tenant(TenantId),
}

/// Correlation id tying a user-visible decision to its audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    /// Generate a fresh id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
