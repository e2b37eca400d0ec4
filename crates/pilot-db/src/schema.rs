//! Metadata schema bootstrap.
//!
//! The engine owns four schemas: `catalog`, `telemetry`, `audit`, and
//! `lifecycle`. Everything is `IF NOT EXISTS` so bootstrap is idempotent.
//! The engine never issues schema DDL against host tables.

use pilot_core::PilotResult;
use sqlx::postgres::PgPool;
use tracing::{debug, info};

use crate::pool::map_sqlx_error;

/// All bootstrap statements, in dependency order.
#[must_use]
pub fn all_statements() -> Vec<&'static str> {
    vec![
        catalog_schema(),
        telemetry_schema(),
        audit_schema(),
        lifecycle_schema(),
    ]
}

/// Field genome and per-tenant expression tables.
#[must_use]
pub fn catalog_schema() -> &'static str {
    r#"
    CREATE SCHEMA IF NOT EXISTS catalog;

    CREATE TABLE IF NOT EXISTS catalog.fields (
        id BIGSERIAL PRIMARY KEY,
        table_name VARCHAR(63) NOT NULL,
        field_name VARCHAR(63) NOT NULL,
        field_type VARCHAR(63) NOT NULL,
        is_required BOOLEAN NOT NULL DEFAULT FALSE,
        is_indexable BOOLEAN NOT NULL DEFAULT TRUE,
        default_active BOOLEAN NOT NULL DEFAULT FALSE,
        field_group VARCHAR(63),
        tombstoned_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (table_name, field_name)
    );

    CREATE INDEX IF NOT EXISTS idx_catalog_fields_table
        ON catalog.fields(table_name);

    CREATE TABLE IF NOT EXISTS catalog.expression (
        id BIGSERIAL PRIMARY KEY,
        tenant_id BIGINT NOT NULL,
        table_name VARCHAR(63) NOT NULL,
        field_name VARCHAR(63) NOT NULL,
        enabled BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (tenant_id, table_name, field_name)
    );

    CREATE INDEX IF NOT EXISTS idx_catalog_expression_tenant
        ON catalog.expression(tenant_id);
    "#
}

/// Append-only query event store.
#[must_use]
pub fn telemetry_schema() -> &'static str {
    r#"
    CREATE SCHEMA IF NOT EXISTS telemetry;

    CREATE TABLE IF NOT EXISTS telemetry.events (
        id BIGSERIAL PRIMARY KEY,
        tenant_id BIGINT,
        table_name VARCHAR(63) NOT NULL,
        field_name VARCHAR(63),
        kind VARCHAR(16) NOT NULL,
        duration_ms DOUBLE PRECISION NOT NULL,
        occurred_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );

    CREATE INDEX IF NOT EXISTS idx_telemetry_events_occurred
        ON telemetry.events(occurred_at);
    CREATE INDEX IF NOT EXISTS idx_telemetry_events_target
        ON telemetry.events(table_name, field_name, occurred_at);
    "#
}

/// Append-only mutation ledger.
#[must_use]
pub fn audit_schema() -> &'static str {
    r#"
    CREATE SCHEMA IF NOT EXISTS audit;

    CREATE TABLE IF NOT EXISTS audit.mutations (
        id BIGSERIAL PRIMARY KEY,
        correlation_id UUID NOT NULL,
        tenant_id BIGINT,
        kind VARCHAR(32) NOT NULL,
        table_name VARCHAR(63),
        field_name VARCHAR(63),
        payload JSONB NOT NULL DEFAULT '{}',
        occurred_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );

    CREATE INDEX IF NOT EXISTS idx_audit_mutations_kind
        ON audit.mutations(kind, occurred_at);
    CREATE INDEX IF NOT EXISTS idx_audit_mutations_target
        ON audit.mutations(table_name, field_name);
    CREATE INDEX IF NOT EXISTS idx_audit_mutations_occurred
        ON audit.mutations(occurred_at);
    "#
}

/// Index versions and experiment bookkeeping.
#[must_use]
pub fn lifecycle_schema() -> &'static str {
    r#"
    CREATE SCHEMA IF NOT EXISTS lifecycle;

    CREATE TABLE IF NOT EXISTS lifecycle.index_versions (
        id BIGSERIAL PRIMARY KEY,
        index_name VARCHAR(63) NOT NULL,
        table_name VARCHAR(63) NOT NULL,
        definition TEXT NOT NULL,
        created_by VARCHAR(63) NOT NULL DEFAULT 'index-pilot',
        metadata JSONB NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );

    CREATE INDEX IF NOT EXISTS idx_lifecycle_versions_name
        ON lifecycle.index_versions(index_name);
    CREATE INDEX IF NOT EXISTS idx_lifecycle_versions_table
        ON lifecycle.index_versions(table_name);

    CREATE TABLE IF NOT EXISTS lifecycle.ab_experiments (
        id BIGSERIAL PRIMARY KEY,
        experiment_name VARCHAR(128) NOT NULL UNIQUE,
        index_name VARCHAR(63) NOT NULL,
        table_name VARCHAR(63) NOT NULL,
        status VARCHAR(16) NOT NULL DEFAULT 'running',
        traffic_share DOUBLE PRECISION NOT NULL DEFAULT 0.1,
        started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        resolved_at TIMESTAMPTZ
    );

    CREATE TABLE IF NOT EXISTS lifecycle.ab_results (
        id BIGSERIAL PRIMARY KEY,
        experiment_id BIGINT NOT NULL REFERENCES lifecycle.ab_experiments(id) ON DELETE CASCADE,
        arm VARCHAR(16) NOT NULL,
        sample_count BIGINT NOT NULL DEFAULT 0,
        mean_cost DOUBLE PRECISION,
        mean_latency_ms DOUBLE PRECISION,
        recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );
    "#
}

/// Create every metadata schema and table.
///
/// # Errors
/// Surfaces the first failed statement.
pub async fn bootstrap_metadata_schema(pool: &PgPool) -> PilotResult<()> {
    info!("bootstrapping metadata schema");
    for statement in all_statements() {
        sqlx::raw_sql(statement)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error(&e))?;
    }
    debug!("metadata schema ready");
    Ok(())
}
