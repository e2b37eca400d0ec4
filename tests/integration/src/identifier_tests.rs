//! Identifier safety scenarios.

use pilot_catalog::CatalogCache;
use pilot_core::{quote_ident, validate_identifier, FieldRef};
use pilot_engine::compose_create_index;
use pilot_core::IndexKind;
use rand::distributions::{Alphanumeric, DistString};
use rand::Rng;
use std::collections::HashSet;

fn random_string(rng: &mut impl Rng, printable_only: bool) -> String {
    if printable_only {
        Alphanumeric.sample_string(rng, 64)
    } else {
        (0..64)
            .map(|_| rng.gen_range(' '..='~'))
            .collect()
    }
}

#[test]
fn random_identifiers_are_rejected_or_quote_safely() {
    // For any random 64-char string: composition either rejects it or
    // produces SQL whose identifier section contains only the quoted,
    // escape-doubled form.
    let mut rng = rand::thread_rng();
    for trial in 0..500 {
        let hostile = random_string(&mut rng, trial % 2 == 0);
        match validate_identifier(&hostile) {
            Ok(()) => {
                // Validation passed, so the string is pure word
                // characters; quoting cannot change its meaning.
                assert!(hostile.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
                let quoted = quote_ident(&hostile);
                assert_eq!(quoted, format!("\"{hostile}\""));
            }
            Err(_) => {
                // Rejected strings never reach SQL composition.
            }
        }
    }
}

#[test]
fn over_long_identifiers_never_validate() {
    // 64 chars exceeds the 63-byte identifier cap, so every 64-char
    // string fails regardless of content.
    let mut rng = rand::thread_rng();
    for _ in 0..100 {
        let value = Alphanumeric.sample_string(&mut rng, 64);
        assert!(validate_identifier(&value).is_err());
    }
}

#[test]
fn ddl_composition_rejects_anything_unvalidatable() {
    for hostile in [
        "users; DROP TABLE users; --",
        "users\"",
        "users'",
        "users)",
        "",
        " ",
    ] {
        assert!(
            compose_create_index(hostile, &["email".to_string()], &IndexKind::BTree).is_err(),
            "{hostile:?} must not compose"
        );
    }
}

#[test]
fn empty_catalog_is_closed_by_default() {
    let cache = CatalogCache::new();
    // Loaded but empty: every identifier is rejected.
    cache.replace(HashSet::new(), HashSet::new());
    for (table, field) in [("users", "email"), ("anything", "at_all")] {
        assert_eq!(cache.contains(table, field), Some(false));
    }

    // With one allowed pair only that pair validates.
    let mut allowed = HashSet::new();
    allowed.insert(FieldRef::new("users", "email"));
    cache.replace(allowed, HashSet::new());
    assert_eq!(cache.contains("users", "email"), Some(true));
    assert_eq!(cache.contains("users", "name"), Some(false));
}
