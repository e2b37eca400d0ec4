//! Database-backed catalog store.

use crate::cache::CatalogCache;
use crate::types::{FieldDescriptor, FieldSpec};
use pilot_core::{validate_identifier, FieldRef, PilotError, PilotResult, TenantId};
use pilot_db::{map_sqlx_error, PilotPool};
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of one bootstrap upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new descriptor row was created.
    Inserted,
    /// An existing row changed.
    Updated,
    /// The row already matched.
    Unchanged,
}

/// The catalog: genome and expression persistence plus the validation
/// cache.
pub struct Catalog {
    pool: Arc<PilotPool>,
    cache: CatalogCache,
}

impl Catalog {
    /// Create a catalog over the shared pool.
    #[must_use]
    pub fn new(pool: Arc<PilotPool>) -> Self {
        Self {
            pool,
            cache: CatalogCache::new(),
        }
    }

    /// The in-process validation cache.
    #[must_use]
    pub fn cache(&self) -> &CatalogCache {
        &self.cache
    }

    fn row_to_descriptor(row: &PgRow) -> PilotResult<FieldDescriptor> {
        Ok(FieldDescriptor {
            table: row.try_get("table_name").map_err(|e| map_sqlx_error(&e))?,
            field: row.try_get("field_name").map_err(|e| map_sqlx_error(&e))?,
            field_type: row.try_get("field_type").map_err(|e| map_sqlx_error(&e))?,
            is_required: row.try_get("is_required").map_err(|e| map_sqlx_error(&e))?,
            is_indexable: row
                .try_get("is_indexable")
                .map_err(|e| map_sqlx_error(&e))?,
            default_active: row
                .try_get("default_active")
                .map_err(|e| map_sqlx_error(&e))?,
            group: row.try_get("field_group").map_err(|e| map_sqlx_error(&e))?,
            tombstoned_at: row
                .try_get("tombstoned_at")
                .map_err(|e| map_sqlx_error(&e))?,
        })
    }

    /// Look up a single descriptor.
    ///
    /// # Errors
    /// Surfaces database errors; an absent row is `Ok(None)`.
    pub async fn lookup(&self, table: &str, field: &str) -> PilotResult<Option<FieldDescriptor>> {
        let row = sqlx::query(
            "SELECT table_name, field_name, field_type, is_required, is_indexable, \
             default_active, field_group, tombstoned_at \
             FROM catalog.fields WHERE table_name = $1 AND field_name = $2",
        )
        .bind(table)
        .bind(field)
        .fetch_optional(self.pool.inner())
        .await
        .map_err(|e| map_sqlx_error(&e))?;

        row.as_ref().map(Self::row_to_descriptor).transpose()
    }

    /// Reload the validation cache from the database.
    ///
    /// # Errors
    /// Surfaces database errors; the cache is left invalidated on failure.
    pub async fn refresh_cache(&self) -> PilotResult<()> {
        let rows = sqlx::query(
            "SELECT table_name, field_name FROM catalog.fields \
             WHERE is_indexable AND tombstoned_at IS NULL",
        )
        .fetch_all(self.pool.inner())
        .await
        .map_err(|e| {
            self.cache.invalidate();
            map_sqlx_error(&e)
        })?;

        let mut allowed = HashSet::with_capacity(rows.len());
        let mut tenant_tables = HashSet::new();
        for row in rows {
            let table: String = row.try_get("table_name").map_err(|e| map_sqlx_error(&e))?;
            let field: String = row.try_get("field_name").map_err(|e| map_sqlx_error(&e))?;
            if field == "tenant_id" {
                tenant_tables.insert(table.clone());
            }
            allowed.insert(FieldRef::new(table, field));
        }

        debug!(allowed = allowed.len(), "catalog cache refreshed");
        self.cache.replace(allowed, tenant_tables);
        Ok(())
    }

    /// Whether the pair passes syntactic and catalog validation.
    ///
    /// # Errors
    /// Surfaces database errors from a cache reload.
    pub async fn is_validated(&self, table: &str, field: &str) -> PilotResult<bool> {
        if validate_identifier(table).is_err() || validate_identifier(field).is_err() {
            return Ok(false);
        }
        match self.cache.contains(table, field) {
            Some(answer) => Ok(answer),
            None => {
                self.refresh_cache().await?;
                // A load that yields nothing means the catalog is empty and
                // therefore closed.
                Ok(self.cache.contains(table, field).unwrap_or(false))
            }
        }
    }

    /// Validate a pair for SQL composition, producing the offending error.
    ///
    /// # Errors
    /// [`PilotError::IdentifierRejected`] for syntax,
    /// [`PilotError::UnknownField`] for unknown pairs.
    pub async fn validate_for_sql(&self, table: &str, field: &str) -> PilotResult<()> {
        validate_identifier(table)?;
        validate_identifier(field)?;
        if self.is_validated(table, field).await? {
            Ok(())
        } else {
            Err(PilotError::unknown_field(table, field))
        }
    }

    /// Fields live for a tenant: enabled expression rows whose descriptor
    /// is indexable and not tombstoned.
    ///
    /// # Errors
    /// Surfaces database errors.
    pub async fn active_fields(&self, tenant: TenantId) -> PilotResult<HashSet<FieldRef>> {
        let rows = sqlx::query(
            "SELECT e.table_name, e.field_name \
             FROM catalog.expression e \
             JOIN catalog.fields f \
               ON f.table_name = e.table_name AND f.field_name = e.field_name \
             WHERE e.tenant_id = $1 AND e.enabled \
               AND f.is_indexable AND f.tombstoned_at IS NULL",
        )
        .bind(tenant.0)
        .fetch_all(self.pool.inner())
        .await
        .map_err(|e| map_sqlx_error(&e))?;

        let mut fields = HashSet::with_capacity(rows.len());
        for row in rows {
            let table: String = row.try_get("table_name").map_err(|e| map_sqlx_error(&e))?;
            let field: String = row.try_get("field_name").map_err(|e| map_sqlx_error(&e))?;
            fields.insert(FieldRef::new(table, field));
        }
        Ok(fields)
    }

    /// Enable a field for a tenant. Idempotent: re-enabling an enabled
    /// field changes nothing.
    ///
    /// # Errors
    /// [`PilotError::UnknownField`] when no live indexable descriptor
    /// exists for the pair.
    pub async fn enable(&self, tenant: TenantId, table: &str, field: &str) -> PilotResult<()> {
        self.set_expression(tenant, table, field, true).await
    }

    /// Disable a field for a tenant. Idempotent.
    ///
    /// # Errors
    /// [`PilotError::UnknownField`] when no live indexable descriptor
    /// exists for the pair.
    pub async fn disable(&self, tenant: TenantId, table: &str, field: &str) -> PilotResult<()> {
        self.set_expression(tenant, table, field, false).await
    }

    async fn set_expression(
        &self,
        tenant: TenantId,
        table: &str,
        field: &str,
        enabled: bool,
    ) -> PilotResult<()> {
        self.validate_for_sql(table, field).await?;

        let descriptor = self
            .lookup(table, field)
            .await?
            .ok_or_else(|| PilotError::unknown_field(table, field))?;
        if !descriptor.is_live() {
            return Err(PilotError::unknown_field(table, field));
        }

        sqlx::query(
            "INSERT INTO catalog.expression (tenant_id, table_name, field_name, enabled) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (tenant_id, table_name, field_name) \
             DO UPDATE SET enabled = EXCLUDED.enabled, updated_at = NOW() \
             WHERE catalog.expression.enabled IS DISTINCT FROM EXCLUDED.enabled",
        )
        .bind(tenant.0)
        .bind(table)
        .bind(field)
        .bind(enabled)
        .execute(self.pool.inner())
        .await
        .map_err(|e| map_sqlx_error(&e))?;

        self.cache.invalidate();
        Ok(())
    }

    /// Register a tenant: create enabled expression rows for every
    /// default-active field.
    ///
    /// # Errors
    /// Surfaces database errors.
    pub async fn initialize_tenant(&self, tenant: TenantId) -> PilotResult<u64> {
        let result = sqlx::query(
            "INSERT INTO catalog.expression (tenant_id, table_name, field_name, enabled) \
             SELECT $1, table_name, field_name, TRUE FROM catalog.fields \
             WHERE default_active AND is_indexable AND tombstoned_at IS NULL \
             ON CONFLICT (tenant_id, table_name, field_name) DO NOTHING",
        )
        .bind(tenant.0)
        .execute(self.pool.inner())
        .await
        .map_err(|e| map_sqlx_error(&e))?;

        info!(tenant = %tenant, fields = result.rows_affected(), "tenant initialized");
        self.cache.invalidate();
        Ok(result.rows_affected())
    }

    /// Remove every expression row for a tenant.
    ///
    /// # Errors
    /// Surfaces database errors.
    pub async fn remove_tenant(&self, tenant: TenantId) -> PilotResult<u64> {
        let result = sqlx::query("DELETE FROM catalog.expression WHERE tenant_id = $1")
            .bind(tenant.0)
            .execute(self.pool.inner())
            .await
            .map_err(|e| map_sqlx_error(&e))?;
        self.cache.invalidate();
        Ok(result.rows_affected())
    }

    /// Upsert one descriptor. Reports whether the row was inserted,
    /// updated, or already identical, so bootstrap can prove idempotence.
    ///
    /// # Errors
    /// [`PilotError::IdentifierRejected`] for bad identifiers, otherwise
    /// database errors.
    pub async fn upsert_field(&self, spec: &FieldSpec) -> PilotResult<UpsertOutcome> {
        validate_identifier(&spec.table)?;
        validate_identifier(&spec.field)?;

        let row = sqlx::query(
            "INSERT INTO catalog.fields \
             (table_name, field_name, field_type, is_required, is_indexable, default_active, field_group) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (table_name, field_name) DO UPDATE SET \
                field_type = EXCLUDED.field_type, \
                is_required = EXCLUDED.is_required, \
                tombstoned_at = NULL, \
                updated_at = NOW() \
             WHERE catalog.fields.field_type IS DISTINCT FROM EXCLUDED.field_type \
                OR catalog.fields.is_required IS DISTINCT FROM EXCLUDED.is_required \
                OR catalog.fields.tombstoned_at IS NOT NULL \
             RETURNING (xmax = 0) AS inserted",
        )
        .bind(&spec.table)
        .bind(&spec.field)
        .bind(&spec.field_type)
        .bind(spec.is_required)
        .bind(spec.is_indexable)
        .bind(spec.default_active)
        .bind(&spec.group)
        .fetch_optional(self.pool.inner())
        .await
        .map_err(|e| map_sqlx_error(&e))?;

        let outcome = match row {
            None => UpsertOutcome::Unchanged,
            Some(row) => {
                let inserted: bool = row.try_get("inserted").map_err(|e| map_sqlx_error(&e))?;
                if inserted {
                    UpsertOutcome::Inserted
                } else {
                    UpsertOutcome::Updated
                }
            }
        };
        Ok(outcome)
    }

    /// Bootstrap the genome from host-supplied field specs. Returns
    /// `(inserted, updated)` counts; a repeat run returns `(0, 0)`.
    ///
    /// # Errors
    /// Stops at the first invalid spec or database error.
    pub async fn bootstrap_from_config(&self, specs: &[FieldSpec]) -> PilotResult<(u64, u64)> {
        let mut inserted = 0u64;
        let mut updated = 0u64;
        for spec in specs {
            match self.upsert_field(spec).await? {
                UpsertOutcome::Inserted => inserted += 1,
                UpsertOutcome::Updated => updated += 1,
                UpsertOutcome::Unchanged => {}
            }
        }
        info!(inserted = inserted, updated = updated, "catalog bootstrap complete");
        self.cache.invalidate();
        Ok((inserted, updated))
    }

    /// Bootstrap the genome from the live database schema. Newly seen
    /// columns arrive indexable but inactive; rerunning changes nothing.
    ///
    /// # Errors
    /// Surfaces database errors.
    pub async fn bootstrap_from_discovery(&self) -> PilotResult<(u64, u64)> {
        let columns = crate::discovery::list_columns(&self.pool).await?;
        let specs: Vec<FieldSpec> = columns
            .into_iter()
            .map(|column| FieldSpec {
                table: column.table,
                field: column.column,
                field_type: column.data_type,
                is_required: !column.is_nullable,
                is_indexable: true,
                default_active: false,
                group: None,
            })
            .collect();
        self.bootstrap_from_config(&specs).await
    }

    /// Tombstone a descriptor and cascade-disable its expression rows.
    ///
    /// # Errors
    /// Surfaces database errors.
    pub async fn tombstone(&self, table: &str, field: &str) -> PilotResult<()> {
        let mut tx = self
            .pool
            .inner()
            .begin()
            .await
            .map_err(|e| map_sqlx_error(&e))?;

        sqlx::query(
            "UPDATE catalog.fields SET tombstoned_at = NOW(), updated_at = NOW() \
             WHERE table_name = $1 AND field_name = $2 AND tombstoned_at IS NULL",
        )
        .bind(table)
        .bind(field)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(&e))?;

        sqlx::query(
            "UPDATE catalog.expression SET enabled = FALSE, updated_at = NOW() \
             WHERE table_name = $1 AND field_name = $2 AND enabled",
        )
        .bind(table)
        .bind(field)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(&e))?;

        tx.commit().await.map_err(|e| map_sqlx_error(&e))?;
        self.cache.invalidate();
        Ok(())
    }

    /// Update a descriptor's declared type after drift.
    ///
    /// # Errors
    /// Surfaces database errors.
    pub async fn update_field_type(
        &self,
        table: &str,
        field: &str,
        field_type: &str,
    ) -> PilotResult<()> {
        sqlx::query(
            "UPDATE catalog.fields SET field_type = $3, updated_at = NOW() \
             WHERE table_name = $1 AND field_name = $2",
        )
        .bind(table)
        .bind(field)
        .bind(field_type)
        .execute(self.pool.inner())
        .await
        .map_err(|e| map_sqlx_error(&e))?;
        self.cache.invalidate();
        Ok(())
    }

    /// All non-tombstoned descriptors, for drift comparison.
    ///
    /// # Errors
    /// Surfaces database errors.
    pub async fn live_descriptors(&self) -> PilotResult<Vec<FieldDescriptor>> {
        let rows = sqlx::query(
            "SELECT table_name, field_name, field_type, is_required, is_indexable, \
             default_active, field_group, tombstoned_at \
             FROM catalog.fields WHERE tombstoned_at IS NULL",
        )
        .fetch_all(self.pool.inner())
        .await
        .map_err(|e| map_sqlx_error(&e))?;

        rows.iter().map(Self::row_to_descriptor).collect()
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("cache_loaded", &self.cache.is_loaded())
            .field("allowed", &self.cache.allowed_len())
            .finish()
    }
}
