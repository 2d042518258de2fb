//! Storage primitives a [`CacheDriver`](crate::CacheDriver) is built on

use serde_json::Value;

use crate::error::Result;

/// Physical storage for raw cache entries.
///
/// Backends move raw entry trees in and out; expiry and structural rules
/// live in the driver. `clean` is the exception: each backend sweeps its own
/// storage, classifying entries with [`entry::inspect`](crate::entry::inspect).
pub trait CacheBackend {
    /// Whether something is stored under `key`. Never fails.
    fn has(&self, key: &str) -> bool;

    /// Raw stored entry for `key`
    fn read(&self, key: &str) -> Result<Value>;

    /// Store `entry` under `key`, replacing any previous entry
    fn write(&mut self, key: &str, entry: Value) -> Result<()>;

    /// Remove `key`; a missing key is not an error
    fn remove(&mut self, key: &str) -> Result<()>;

    /// Remove every entry
    fn flush(&mut self) -> Result<()>;

    /// Remove expired and corrupt entries, returning how many went
    fn clean(&mut self) -> Result<usize>;

    /// Number of stored entries
    fn count(&self) -> Result<usize>;

    /// Bytes occupied by stored entries
    fn size_bytes(&self) -> Result<u64>;

    /// Admission hook run with the fully built raw entry before it is written
    fn prepare_save(&mut self, _key: &str, _entry: &Value) -> Result<()> {
        Ok(())
    }

    /// Called after `key` was successfully loaded
    fn loaded(&mut self, _key: &str) {}
}

impl<B: CacheBackend + ?Sized> CacheBackend for Box<B> {
    fn has(&self, key: &str) -> bool {
        (**self).has(key)
    }

    fn read(&self, key: &str) -> Result<Value> {
        (**self).read(key)
    }

    fn write(&mut self, key: &str, entry: Value) -> Result<()> {
        (**self).write(key, entry)
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        (**self).remove(key)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn clean(&mut self) -> Result<usize> {
        (**self).clean()
    }

    fn count(&self) -> Result<usize> {
        (**self).count()
    }

    fn size_bytes(&self) -> Result<u64> {
        (**self).size_bytes()
    }

    fn prepare_save(&mut self, key: &str, entry: &Value) -> Result<()> {
        (**self).prepare_save(key, entry)
    }

    fn loaded(&mut self, key: &str) {
        (**self).loaded(key)
    }
}
