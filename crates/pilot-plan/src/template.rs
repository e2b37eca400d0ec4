//! Query template normalization.
//!
//! Literals are masked so that queries differing only in bound values or
//! inlined constants share one cache entry and one interceptor decision.

use once_cell::sync::Lazy;
use regex::Regex;

static STRING_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'(?:[^']|'')*'").expect("static literal pattern"));
static NUMERIC_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d+(?:\.\d+)?\b").expect("static numeric pattern"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static ws pattern"));

/// Normalize a query into its template signature.
#[must_use]
pub fn normalize_template(sql: &str) -> String {
    let masked = STRING_LITERAL.replace_all(sql, "?");
    let masked = NUMERIC_LITERAL.replace_all(&masked, "?");
    let collapsed = WHITESPACE.replace_all(&masked, " ");
    collapsed.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks_string_literals() {
        assert_eq!(
            normalize_template("SELECT * FROM users WHERE email = 'a@b.c'"),
            "SELECT * FROM users WHERE email = ?"
        );
    }

    #[test]
    fn test_masks_escaped_quotes() {
        assert_eq!(
            normalize_template("SELECT * FROM t WHERE name = 'O''Brien'"),
            "SELECT * FROM t WHERE name = ?"
        );
    }

    #[test]
    fn test_masks_numbers_and_collapses_whitespace() {
        assert_eq!(
            normalize_template("SELECT *\n  FROM orders\n  WHERE total > 100.50 AND qty = 3"),
            "SELECT * FROM orders WHERE total > ? AND qty = ?"
        );
    }

    #[test]
    fn test_identical_shapes_share_a_template() {
        let a = normalize_template("SELECT * FROM users WHERE id = 1");
        let b = normalize_template("SELECT * FROM users WHERE id = 99999");
        assert_eq!(a, b);
    }

    #[test]
    fn test_placeholders_survive() {
        assert_eq!(
            normalize_template("SELECT * FROM users WHERE email = $1"),
            "SELECT * FROM users WHERE email = $?"
        );
    }
}
