//! Deterministic query fingerprinting.

use sha2::{Digest, Sha256};

use crate::tables::normalize_sql;

/// Hex digest length kept in cache keys. Thirty-two hex chars (128 bits)
/// keeps keys short while leaving collisions out of practical reach.
const HASH_LEN: usize = 32;

/// Fingerprint a statement plus its bound parameters.
///
/// The SQL is normalized first so formatting differences (whitespace,
/// case) hash identically. Parameters are serialized through their JSON
/// representation, which is stable for a given value.
pub fn query_hash(sql: &str, params: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_sql(sql).as_bytes());
    hasher.update(b"|");
    hasher.update(params.to_string().as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..HASH_LEN].to_string()
}
