//! Canonical entry encoding
//!
//! Every byte count and hash the cache produces comes from this one codec:
//! compact JSON with object keys in sorted order (`serde_json::Value` keeps
//! maps in a `BTreeMap`). Disk files, memory accounting and content hashes
//! therefore never disagree about what a value "is".

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Canonical encoding of boolean `false`.
///
/// A file holding exactly these bytes decodes fine; it is a structurally
/// invalid entry, not a corrupted one.
pub const FALSE_ENCODING: &[u8] = b"false";

/// Convert any serializable value into its canonical JSON tree
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Canonical bytes for a value tree
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Decode canonical bytes back into a value tree
pub fn decode(bytes: &[u8]) -> std::result::Result<Value, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// Length of the canonical encoding in bytes
pub fn encoded_len(value: &Value) -> u64 {
    // Serializing a `Value` only fails for non-string map keys, which a
    // `Value` cannot hold.
    serde_json::to_vec(value).map(|b| b.len() as u64).unwrap_or(0)
}

/// Hex-encoded SHA-256 of arbitrary bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hash used to place a key on disk
pub fn key_hash(key: &str) -> String {
    sha256_hex(key.as_bytes())
}
