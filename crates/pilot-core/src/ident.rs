//! SQL identifier validation and quoting.
//!
//! Every identifier that reaches SQL composition goes through this module.
//! Validation here is syntactic only; callers must additionally check
//! catalog membership before composing SQL (the catalog is closed by
//! default, so an empty catalog rejects everything).

use crate::error::{PilotError, PilotResult};
use once_cell::sync::Lazy;
use regex::Regex;

/// Pattern every bare identifier must match.
static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static identifier pattern"));

/// Maximum identifier length accepted, matching the Postgres NAMEDATALEN cap.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Validate an identifier syntactically.
///
/// # Errors
/// Returns [`PilotError::IdentifierRejected`] when the identifier is empty,
/// over-long, or contains characters outside `[A-Za-z0-9_]`.
pub fn validate_identifier(identifier: &str) -> PilotResult<()> {
    if identifier.is_empty()
        || identifier.len() > MAX_IDENTIFIER_LEN
        || !IDENTIFIER.is_match(identifier)
    {
        return Err(PilotError::identifier_rejected(identifier));
    }
    Ok(())
}

/// Quote a validated identifier for inclusion in SQL.
///
/// Embedded double quotes are doubled, so the output is safe even if a
/// caller skipped validation.
#[must_use]
pub fn quote_ident(identifier: &str) -> String {
    let escaped = identifier.replace('"', "\"\"");
    format!("\"{escaped}\"")
}

/// Quote a `schema.relation` pair.
#[must_use]
pub fn quote_qualified(schema: &str, relation: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(relation))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_identifiers() {
        for ident in ["users", "email", "_private", "t1", "snake_case_name"] {
            assert!(validate_identifier(ident).is_ok(), "{ident} should pass");
        }
    }

    #[test]
    fn test_rejects_hostile_identifiers() {
        for ident in [
            "",
            "1starts_with_digit",
            "has space",
            "semi;colon",
            "users; DROP TABLE users",
            "quote\"inside",
            "dash-name",
            "dot.name",
        ] {
            assert!(validate_identifier(ident).is_err(), "{ident} should fail");
        }
    }

    #[test]
    fn test_rejects_over_long_identifier() {
        let long = "a".repeat(64);
        assert!(validate_identifier(&long).is_err());
        let max = "a".repeat(63);
        assert!(validate_identifier(&max).is_ok());
    }

    #[test]
    fn test_quoting_doubles_embedded_quotes() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_quote_qualified() {
        assert_eq!(quote_qualified("catalog", "fields"), "\"catalog\".\"fields\"");
    }

    #[test]
    fn test_random_strings_never_pass_unquoted() {
        // Any string that validates is guaranteed to contain only word
        // characters, so quoting it cannot change its meaning.
        for s in ["a'b", "x--comment", "union select", "\0byte"] {
            assert!(validate_identifier(s).is_err());
        }
    }
}
