//! Index DDL composition.
//!
//! The only place CREATE/DROP INDEX text is assembled. Identifiers must
//! already be catalog-validated; they are syntax-checked once more and
//! quoted here, never interpolated raw.

use pilot_core::{quote_ident, validate_identifier, IndexKind, PilotResult};

/// Deterministic name for an engine-created index.
#[must_use]
pub fn index_name_for(table: &str, fields: &[String], kind: &IndexKind) -> String {
    let mut name = format!("pilot_idx_{table}_{}", fields.join("_"));
    match kind {
        IndexKind::LowerExpression => name.push_str("_lower"),
        IndexKind::TextPattern => name.push_str("_tpo"),
        IndexKind::Partial { .. } => name.push_str("_part"),
        IndexKind::BTree | IndexKind::Composite => {}
    }
    // Stay inside the identifier length cap.
    name.truncate(63);
    name
}

/// Compose `CREATE INDEX CONCURRENTLY` for a validated candidate.
/// Returns the index name and the statement.
///
/// # Errors
/// Rejects any identifier that fails syntactic validation.
pub fn compose_create_index(
    table: &str,
    fields: &[String],
    kind: &IndexKind,
) -> PilotResult<(String, String)> {
    validate_identifier(table)?;
    for field in fields {
        validate_identifier(field)?;
    }

    let name = index_name_for(table, fields, kind);
    validate_identifier(&name)?;

    let column_list = match kind {
        IndexKind::LowerExpression => fields
            .iter()
            .map(|field| format!("lower({})", quote_ident(field)))
            .collect::<Vec<_>>()
            .join(", "),
        IndexKind::TextPattern => fields
            .iter()
            .map(|field| format!("{} text_pattern_ops", quote_ident(field)))
            .collect::<Vec<_>>()
            .join(", "),
        IndexKind::BTree | IndexKind::Composite | IndexKind::Partial { .. } => fields
            .iter()
            .map(|field| quote_ident(field))
            .collect::<Vec<_>>()
            .join(", "),
    };

    let mut sql = format!(
        "CREATE INDEX CONCURRENTLY IF NOT EXISTS {} ON {} ({})",
        quote_ident(&name),
        quote_ident(table),
        column_list,
    );
    if let IndexKind::Partial { predicate } = kind {
        // The predicate is restricted to the one shape the type selector
        // emits; anything else would have to extend the enum.
        let field = fields.first().map(String::as_str).unwrap_or_default();
        sql.push_str(&format!(" WHERE {} {predicate}", quote_ident(field)));
    }
    Ok((name, sql))
}

/// Compose `DROP INDEX CONCURRENTLY`.
///
/// # Errors
/// Rejects an invalid index name.
pub fn compose_drop_index(index_name: &str) -> PilotResult<String> {
    validate_identifier(index_name)?;
    Ok(format!(
        "DROP INDEX CONCURRENTLY IF EXISTS {}",
        quote_ident(index_name)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_btree() {
        let (name, sql) =
            compose_create_index("users", &["email".to_string()], &IndexKind::BTree).unwrap();
        assert_eq!(name, "pilot_idx_users_email");
        assert_eq!(
            sql,
            "CREATE INDEX CONCURRENTLY IF NOT EXISTS \"pilot_idx_users_email\" ON \"users\" (\"email\")"
        );
    }

    #[test]
    fn test_composite_orders_columns() {
        let fields = vec!["email".to_string(), "tenant_id".to_string()];
        let (_, sql) = compose_create_index("users", &fields, &IndexKind::Composite).unwrap();
        assert!(sql.contains("(\"email\", \"tenant_id\")"));
    }

    #[test]
    fn test_lower_expression() {
        let (name, sql) =
            compose_create_index("contacts", &["name".to_string()], &IndexKind::LowerExpression)
                .unwrap();
        assert!(name.ends_with("_lower"));
        assert!(sql.contains("(lower(\"name\"))"));
    }

    #[test]
    fn test_text_pattern_ops() {
        let (_, sql) =
            compose_create_index("users", &["email".to_string()], &IndexKind::TextPattern)
                .unwrap();
        assert!(sql.contains("\"email\" text_pattern_ops"));
    }

    #[test]
    fn test_partial_predicate() {
        let kind = IndexKind::Partial {
            predicate: "IS NOT NULL".to_string(),
        };
        let (_, sql) = compose_create_index("users", &["deleted_at".to_string()], &kind).unwrap();
        assert!(sql.ends_with("WHERE \"deleted_at\" IS NOT NULL"));
    }

    #[test]
    fn test_hostile_identifiers_rejected() {
        let fields = vec!["email; DROP TABLE users".to_string()];
        assert!(compose_create_index("users", &fields, &IndexKind::BTree).is_err());
        assert!(compose_create_index("users; --", &["a".to_string()], &IndexKind::BTree).is_err());
        assert!(compose_drop_index("bad name").is_err());
    }

    #[test]
    fn test_long_names_are_truncated() {
        let table = "a".repeat(40);
        let fields = vec!["b".repeat(40)];
        let name = index_name_for(&table, &fields, &IndexKind::BTree);
        assert!(name.len() <= 63);
    }

    #[test]
    fn test_drop_index() {
        assert_eq!(
            compose_drop_index("pilot_idx_users_email").unwrap(),
            "DROP INDEX CONCURRENTLY IF EXISTS \"pilot_idx_users_email\""
        );
    }
}
