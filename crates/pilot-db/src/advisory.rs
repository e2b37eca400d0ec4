//! Advisory lock primitives.
//!
//! Index DDL on a target is serialized with a session-level advisory lock
//! whose key is derived deterministically from the table and the sorted
//! field set, so every process computes the same key for the same target.
//! The lock must be taken and released on the same connection.

use pilot_core::PilotResult;
use sha2::{Digest, Sha256};
use sqlx::pool::PoolConnection;
use sqlx::{Postgres, Row};

use crate::pool::map_sqlx_error;

/// Deterministic 64-bit lock key: SHA-256 over `table||field1,field2,...`
/// with the fields sorted, folded to the first 8 bytes.
#[must_use]
pub fn lock_key(table: &str, fields: &[&str]) -> i64 {
    let mut sorted: Vec<&str> = fields.to_vec();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(table.as_bytes());
    hasher.update(b"||");
    hasher.update(sorted.join(",").as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

/// Attempt to take the session advisory lock without blocking.
///
/// # Errors
/// Returns a database error when the call itself fails; a held lock is
/// reported as `Ok(false)`.
pub async fn try_advisory_lock(
    conn: &mut PoolConnection<Postgres>,
    key: i64,
) -> PilotResult<bool> {
    let row = sqlx::query("SELECT pg_try_advisory_lock($1) AS locked")
        .bind(key)
        .fetch_one(&mut **conn)
        .await
        .map_err(|e| map_sqlx_error(&e))?;
    row.try_get::<bool, _>("locked")
        .map_err(|e| map_sqlx_error(&e))
}

/// Release a previously taken session advisory lock.
///
/// # Errors
/// Returns a database error when the call itself fails; `Ok(false)` means
/// the session did not hold the lock.
pub async fn advisory_unlock(conn: &mut PoolConnection<Postgres>, key: i64) -> PilotResult<bool> {
    let row = sqlx::query("SELECT pg_advisory_unlock($1) AS released")
        .bind(key)
        .fetch_one(&mut **conn)
        .await
        .map_err(|e| map_sqlx_error(&e))?;
    row.try_get::<bool, _>("released")
        .map_err(|e| map_sqlx_error(&e))
}
