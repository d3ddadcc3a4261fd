//! Digest primitives for SentinelChain
//!
//! Every digest in the chain is SHA-256 over a canonical JSON encoding:
//! object keys sorted at every depth, compact separators (RFC 8785 / JCS).
//! Two payloads that differ only in key order therefore hash identically.
//! Numbers are written in their shortest IEEE double form, so `1.0` and `1`
//! hash identically too; a payload differing only that way is a duplicate.

use crate::error::ChainError;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Serialize any value into its canonical byte form.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, ChainError> {
    serde_jcs::to_string(value)
        .map(String::into_bytes)
        .map_err(|e| ChainError::Serialization(format!("Failed to canonicalize value: {}", e)))
}

/// SHA-256 of raw bytes as a lowercase hex string.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 of the canonical encoding of `value`.
pub fn canonical_digest<T: Serialize>(value: &T) -> Result<String, ChainError> {
    Ok(sha256_hex(&canonical_bytes(value)?))
}
