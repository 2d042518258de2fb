//! Stored entry envelope and its structural validation

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec;
use crate::error::{CacheError, Result};

/// Top-level fields every stored entry must carry
pub const REQUIRED_FIELDS: [&str; 4] = ["value", "created_at", "expires_at", "metadata"];

/// Envelope wrapping every cached value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Value,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    /// `None` means the entry never expires
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: EntryMetadata,
}

/// Facts about the value derived from its canonical encoding at write time.
///
/// Nothing re-checks `content_hash` on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub type_tag: String,
    pub size_bytes: u64,
    pub content_hash: String,
}

impl EntryMetadata {
    /// Derive metadata from the canonical encoding of `value`
    pub fn derive(value: &Value) -> Result<Self> {
        let bytes = codec::encode(value)?;
        Ok(Self {
            type_tag: type_tag(value).to_string(),
            size_bytes: bytes.len() as u64,
            content_hash: codec::sha256_hex(&bytes),
        })
    }
}

/// JSON kind of a value as recorded in `metadata.type_tag`
pub fn type_tag(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "double",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Current time at the resolution entries are stored with
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

impl CacheEntry {
    /// Build a fresh entry created at `now`, expiring `ttl` seconds later
    pub fn new(value: Value, ttl: Option<i64>, now: DateTime<Utc>) -> Result<Self> {
        let expires_at = match ttl {
            Some(secs) if secs < 0 => return Err(CacheError::InvalidTtl(secs)),
            Some(secs) => Some(
                TimeDelta::try_seconds(secs)
                    .and_then(|delta| now.checked_add_signed(delta))
                    .ok_or(CacheError::InvalidTtl(secs))?,
            ),
            None => None,
        };
        let metadata = EntryMetadata::derive(&value)?;

        Ok(Self {
            value,
            created_at: now,
            expires_at,
            metadata,
        })
    }

    /// Raw form handed to backends
    pub fn to_raw(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Validate a raw stored entry.
    ///
    /// Extra fields (the file backend adds `key`) are ignored.
    pub fn from_raw(key: &str, raw: Value) -> Result<Self> {
        let fields = match raw.as_object() {
            Some(fields) => fields,
            None => {
                return Err(CacheError::InvalidDataStructure {
                    key: key.to_string(),
                    reason: format!("expected an object, found {}", type_tag(&raw)),
                })
            }
        };

        if let Some(field) = REQUIRED_FIELDS
            .into_iter()
            .find(|f| !fields.contains_key(*f))
        {
            return Err(CacheError::MissingRequiredKey {
                key: key.to_string(),
                field,
            });
        }

        let entry: CacheEntry =
            serde_json::from_value(raw).map_err(|e| CacheError::InvalidDataStructure {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        if entry.expires_at.is_some_and(|at| at < entry.created_at) {
            return Err(CacheError::InvalidDataStructure {
                key: key.to_string(),
                reason: "expires_at precedes created_at".to_string(),
            });
        }

        Ok(entry)
    }

    /// An entry is expired from its `expires_at` second onwards
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Outcome of inspecting a stored entry during a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Valid,
    Expired,
    Invalid,
}

/// Classify a raw entry without surfacing errors
pub fn inspect(key: &str, raw: Value, now: DateTime<Utc>) -> EntryState {
    match CacheEntry::from_raw(key, raw) {
        Ok(entry) if entry.is_expired(now) => EntryState::Expired,
        Ok(_) => EntryState::Valid,
        Err(_) => EntryState::Invalid,
    }
}
