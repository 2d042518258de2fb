//! Public cache API layered over a [`CacheBackend`]
//!
//! The driver owns the rules both backends share: TTL handling, structural
//! validation of stored entries, and self-healing deletes of entries found
//! expired or corrupt. Read-modify-write helpers (`increment`, `remember`)
//! are plain load-then-save sequences and are not atomic.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Number, Value};
use tracing::{debug, info, warn};

use crate::backend::CacheBackend;
use crate::codec;
use crate::entry::{self, CacheEntry};
use crate::error::{CacheError, Result};
use crate::types::CacheStats;

/// Cache front end over a storage backend
pub struct CacheDriver<B> {
    backend: B,
    /// TTL in seconds used when `save` gets none; `None` never expires
    default_ttl: Option<i64>,
    hits: u64,
    misses: u64,
}

fn check_ttl(ttl: Option<i64>) -> Result<Option<i64>> {
    match ttl {
        Some(secs) if secs < 0 => Err(CacheError::InvalidTtl(secs)),
        ttl => Ok(ttl),
    }
}

/// Numeric value held by a counter key
#[derive(Debug, Clone, Copy, PartialEq)]
enum Counter {
    Int(i64),
    Float(f64),
}

impl Counter {
    fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Ok(n) = text.parse::<i64>() {
            return Some(Counter::Int(n));
        }
        text.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Counter::Float)
    }

    fn as_f64(self) -> f64 {
        match self {
            Counter::Int(n) => n as f64,
            Counter::Float(f) => f,
        }
    }
}

fn as_counter(key: &str, value: &Value) -> Result<Counter> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(Counter::Int)
            .or_else(|| n.as_f64().map(Counter::Float)),
        Value::String(s) => Counter::parse(s),
        _ => None,
    }
    .ok_or_else(|| CacheError::NonNumericValue {
        key: key.to_string(),
    })
}

fn float_number(key: &str, value: f64) -> Result<Number> {
    Number::from_f64(value).ok_or_else(|| CacheError::CounterOverflow {
        key: key.to_string(),
    })
}

impl<B: CacheBackend> CacheDriver<B> {
    /// Wrap `backend` with no default TTL
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            default_ttl: None,
            hits: 0,
            misses: 0,
        }
    }

    /// Wrap `backend` with a default TTL applied to saves without one
    pub fn with_default_ttl(backend: B, ttl: Option<i64>) -> Result<Self> {
        let mut driver = Self::new(backend);
        driver.set_default_ttl(ttl)?;
        Ok(driver)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn default_ttl(&self) -> Option<i64> {
        self.default_ttl
    }

    pub fn set_default_ttl(&mut self, ttl: Option<i64>) -> Result<()> {
        self.default_ttl = check_ttl(ttl)?;
        Ok(())
    }

    /// Read and validate the entry for `key`, dropping it if expired
    fn load_entry(&mut self, key: &str) -> Result<CacheEntry> {
        if !self.backend.has(key) {
            return Err(CacheError::KeyNotFound(key.to_string()));
        }

        let raw = self.backend.read(key)?;
        let entry = CacheEntry::from_raw(key, raw)?;

        if entry.is_expired(entry::now()) {
            self.backend.remove(key)?;
            debug!(key = %key, "Cache entry expired");
            return Err(CacheError::KeyExpired(key.to_string()));
        }

        self.backend.loaded(key);
        Ok(entry)
    }

    /// Load the value stored under `key`
    pub fn load<V: DeserializeOwned>(&mut self, key: &str) -> Result<V> {
        let result = self.load_entry(key);
        match &result {
            Ok(_) => {
                self.hits += 1;
                debug!(key = %key, "Cache hit");
            }
            Err(e @ CacheError::KeyNotFound(_)) | Err(e @ CacheError::KeyExpired(_)) => {
                self.misses += 1;
                debug!(key = %key, reason = %e, "Cache miss");
            }
            Err(e) => {
                self.misses += 1;
                warn!(key = %key, error = %e, "Failed to load cache entry");
            }
        }

        serde_json::from_value(result?.value).map_err(|source| CacheError::ValueType {
            key: key.to_string(),
            source,
        })
    }

    /// Load `key`, falling back to `default` on any cache error
    pub fn safe_load<V: DeserializeOwned>(&mut self, key: &str, default: V) -> V {
        self.load(key).unwrap_or(default)
    }

    /// Whether a valid, unexpired entry is stored under `key`.
    ///
    /// Expired or corrupt entries found here are deleted.
    pub fn exists(&mut self, key: &str) -> bool {
        if !self.backend.has(key) {
            return false;
        }

        let valid = match self
            .backend
            .read(key)
            .and_then(|raw| CacheEntry::from_raw(key, raw))
        {
            Ok(entry) => !entry.is_expired(entry::now()),
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding unreadable cache entry");
                false
            }
        };

        if !valid {
            if let Err(e) = self.backend.remove(key) {
                warn!(key = %key, error = %e, "Failed to remove stale cache entry");
            }
        }
        valid
    }

    /// Store `value` under `key` for `ttl` seconds (default TTL when `None`)
    pub fn save<V: Serialize + ?Sized>(
        &mut self,
        key: &str,
        value: &V,
        ttl: Option<i64>,
    ) -> Result<()> {
        let ttl = match check_ttl(ttl)? {
            Some(secs) => Some(secs),
            None => self.default_ttl,
        };
        let entry = CacheEntry::new(codec::to_value(value)?, ttl, entry::now())?;
        let raw = entry.to_raw()?;

        self.backend.prepare_save(key, &raw)?;
        self.backend.write(key, raw)?;

        debug!(key = %key, ttl = ?ttl, size = entry.metadata.size_bytes, "Saved cache entry");
        Ok(())
    }

    /// Return the cached value for `key`, or compute, store and return it.
    ///
    /// Errors from `producer` are returned untouched.
    pub fn remember<V, E, F>(
        &mut self,
        key: &str,
        ttl: Option<i64>,
        producer: F,
    ) -> std::result::Result<V, E>
    where
        V: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> std::result::Result<V, E>,
    {
        match self.load(key) {
            Ok(value) => return Ok(value),
            Err(e) if e.is_miss() => {}
            Err(e) => return Err(e.into()),
        }

        let value = producer()?;
        self.save(key, &value, ttl)?;
        Ok(value)
    }

    /// Current counter under `key`; absent or expired keys count as 0
    fn load_counter(&mut self, key: &str) -> Result<Counter> {
        match self.load::<Value>(key) {
            Ok(value) => as_counter(key, &value),
            Err(CacheError::KeyNotFound(_)) | Err(CacheError::KeyExpired(_)) => {
                Ok(Counter::Int(0))
            }
            Err(e) => Err(e),
        }
    }

    /// Add `step` to the number stored under `key` (absent counts as 0).
    ///
    /// Integer counters stay integers; a float counter stays a float.
    pub fn increment(&mut self, key: &str, step: i64) -> Result<Number> {
        let next = match self.load_counter(key)? {
            Counter::Int(n) => n
                .checked_add(step)
                .map(Number::from)
                .ok_or_else(|| CacheError::CounterOverflow {
                    key: key.to_string(),
                })?,
            Counter::Float(f) => float_number(key, f + step as f64)?,
        };
        self.save(key, &next, None)?;
        Ok(next)
    }

    /// Subtract `step` from the number stored under `key`
    pub fn decrement(&mut self, key: &str, step: i64) -> Result<Number> {
        let step = step.checked_neg().ok_or_else(|| CacheError::CounterOverflow {
            key: key.to_string(),
        })?;
        self.increment(key, step)
    }

    /// Add a fractional `step`; the stored counter becomes a float
    pub fn increment_float(&mut self, key: &str, step: f64) -> Result<f64> {
        let next = self.load_counter(key)?.as_f64() + step;
        self.save(key, &float_number(key, next)?, None)?;
        Ok(next)
    }

    pub fn decrement_float(&mut self, key: &str, step: f64) -> Result<f64> {
        self.increment_float(key, -step)
    }

    /// Remove `key`; missing keys are ignored
    pub fn delete(&mut self, key: &str) -> Result<()> {
        self.backend.remove(key)
    }

    /// Remove every entry
    pub fn clear(&mut self) -> Result<()> {
        self.backend.flush()
    }

    /// Load several keys; failures yield `default` for that key
    pub fn load_many<V, I, K>(&mut self, keys: I, default: V) -> HashMap<String, V>
    where
        V: DeserializeOwned + Clone,
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut values = HashMap::new();
        for key in keys {
            let key = key.as_ref();
            let value = match self.load(key) {
                Ok(value) => value,
                Err(e) => {
                    debug!(key = %key, error = %e, "Batch load fell back to default");
                    default.clone()
                }
            };
            values.insert(key.to_string(), value);
        }
        values
    }

    /// Save several entries, returning how many were stored
    pub fn save_many<I, K, V>(&mut self, items: I, ttl: Option<i64>) -> usize
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Serialize,
    {
        let mut saved = 0;
        for (key, value) in items {
            match self.save(key.as_ref(), &value, ttl) {
                Ok(()) => saved += 1,
                Err(e) => warn!(key = %key.as_ref(), error = %e, "Batch save skipped entry"),
            }
        }
        saved
    }

    /// Delete several keys, returning how many deletes succeeded
    pub fn delete_many<I, K>(&mut self, keys: I) -> usize
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut deleted = 0;
        for key in keys {
            match self.delete(key.as_ref()) {
                Ok(()) => deleted += 1,
                Err(e) => warn!(key = %key.as_ref(), error = %e, "Batch delete skipped entry"),
            }
        }
        deleted
    }

    /// Sweep expired and corrupt entries from the backend
    pub fn clean(&mut self) -> Result<usize> {
        let removed = self.backend.clean()?;
        info!(removed, "Cache sweep finished");
        Ok(removed)
    }

    /// Number of stored entries, valid or not
    pub fn count(&self) -> Result<usize> {
        self.backend.count()
    }

    pub fn stats(&self) -> Result<CacheStats> {
        Ok(CacheStats {
            entries: self.backend.count()?,
            total_size: self.backend.size_bytes()?,
            hits: self.hits,
            misses: self.misses,
        })
    }
}
