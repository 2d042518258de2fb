//! Bounded in-process storage with LRU eviction
//!
//! Capacity is enforced on two independent axes: number of entries and
//! bytes, where bytes are the canonical encoded size of every stored entry.
//! Byte usage is recomputed from scratch whenever it is needed.
//!
//! Not synchronized: wrap the driver in a `Mutex` to share it.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::debug;

use crate::backend::CacheBackend;
use crate::codec;
use crate::entry::{self, EntryState};
use crate::error::{CacheError, Result};

struct Slot {
    entry: Value,
    /// Position in `recency`
    tick: u64,
}

/// Cache backend keeping entries in a process-local map
#[derive(Default)]
pub struct MemoryBackend {
    entries: HashMap<String, Slot>,
    /// Access order, least recently used first
    recency: BTreeMap<u64, String>,
    next_tick: u64,
    max_items: Option<usize>,
    memory_limit: Option<u64>,
}

impl MemoryBackend {
    /// Create a backend with optional item and byte limits
    pub fn new(max_items: Option<usize>, memory_limit: Option<u64>) -> Self {
        Self {
            max_items,
            memory_limit,
            ..Self::default()
        }
    }

    /// Backend without capacity limits
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn max_items(&self) -> Option<usize> {
        self.max_items
    }

    pub fn memory_limit(&self) -> Option<u64> {
        self.memory_limit
    }

    /// Bytes used by all stored entries
    pub fn memory_usage(&self) -> u64 {
        self.entries
            .values()
            .map(|slot| codec::encoded_len(&slot.entry))
            .sum()
    }

    /// Stored keys, least recently used first
    pub fn keys(&self) -> Vec<String> {
        self.recency.values().cloned().collect()
    }

    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    /// Mark `key` as most recently used
    fn touch(&mut self, key: &str) {
        let tick = self.bump();
        if let Some(slot) = self.entries.get_mut(key) {
            self.recency.remove(&slot.tick);
            slot.tick = tick;
            self.recency.insert(tick, key.to_string());
        }
    }

    /// Remove the least recently used entry other than `exclude`.
    ///
    /// Returns whether anything was evicted.
    pub fn evict(&mut self, exclude: Option<&str>) -> bool {
        let victim = self
            .recency
            .iter()
            .find(|(_, key)| Some(key.as_str()) != exclude)
            .map(|(tick, key)| (*tick, key.clone()));

        match victim {
            Some((tick, key)) => {
                self.recency.remove(&tick);
                self.entries.remove(&key);
                debug!(key = %key, "Evicted least recently used cache entry");
                true
            }
            None => false,
        }
    }
}

impl CacheBackend for MemoryBackend {
    fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn read(&self, key: &str) -> Result<Value> {
        self.entries
            .get(key)
            .map(|slot| slot.entry.clone())
            .ok_or_else(|| CacheError::KeyNotFound(key.to_string()))
    }

    fn write(&mut self, key: &str, entry: Value) -> Result<()> {
        let tick = self.bump();
        if let Some(old) = self.entries.insert(key.to_string(), Slot { entry, tick }) {
            self.recency.remove(&old.tick);
        }
        self.recency.insert(tick, key.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        if let Some(slot) = self.entries.remove(key) {
            self.recency.remove(&slot.tick);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.entries.clear();
        self.recency.clear();
        Ok(())
    }

    fn clean(&mut self) -> Result<usize> {
        let now = entry::now();
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, slot)| {
                entry::inspect(key, slot.entry.clone(), now) != EntryState::Valid
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in &stale {
            self.remove(key)?;
        }

        debug!(removed = stale.len(), "Cleaned memory cache");
        Ok(stale.len())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.entries.len())
    }

    fn size_bytes(&self) -> Result<u64> {
        Ok(self.memory_usage())
    }

    /// Make room for `entry` under `key`.
    ///
    /// Bytes are counted for the whole entry, the same unit `memory_usage`
    /// sums, so usage stays within the limit after the write. Evictions made
    /// here stay in effect even if a later check rejects the entry.
    fn prepare_save(&mut self, key: &str, entry: &Value) -> Result<()> {
        let is_new = !self.entries.contains_key(key);

        if let Some(limit) = self.max_items {
            if is_new && self.entries.len() >= limit && !self.evict(None) {
                return Err(CacheError::ItemsLimitExceeded { limit });
            }
        }

        if let Some(limit) = self.memory_limit {
            let required = codec::encoded_len(entry);
            if required > limit {
                return Err(CacheError::MemoryLimitExceeded { limit, required });
            }

            let existing = self
                .entries
                .get(key)
                .map(|slot| codec::encoded_len(&slot.entry))
                .unwrap_or(0);

            loop {
                let projected = self.memory_usage().saturating_sub(existing) + required;
                if projected <= limit {
                    break;
                }
                if !self.evict(Some(key)) {
                    return Err(CacheError::MemoryLimitExceeded {
                        limit,
                        required: projected,
                    });
                }
            }
        }

        Ok(())
    }

    fn loaded(&mut self, key: &str) {
        self.touch(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::CacheEntry;
    use serde_json::json;

    fn raw_entry(value: Value, ttl: Option<i64>) -> Value {
        CacheEntry::new(value, ttl, entry::now())
            .unwrap()
            .to_raw()
            .unwrap()
    }

    fn put(backend: &mut MemoryBackend, key: &str, value: Value) -> Result<()> {
        let raw = raw_entry(value, None);
        backend.prepare_save(key, &raw)?;
        backend.write(key, raw)
    }

    #[test]
    fn test_write_read_remove() {
        let mut backend = MemoryBackend::unbounded();
        backend.write("k", raw_entry(json!("v"), None)).unwrap();

        assert!(backend.has("k"));
        assert_eq!(backend.read("k").unwrap()["value"], "v");

        backend.remove("k").unwrap();
        backend.remove("k").unwrap();
        assert!(!backend.has("k"));
        assert!(matches!(backend.read("k"), Err(CacheError::KeyNotFound(_))));
    }

    #[test]
    fn test_evict_picks_least_recently_used() {
        let mut backend = MemoryBackend::unbounded();
        for key in ["a", "b", "c"] {
            backend.write(key, raw_entry(json!(key), None)).unwrap();
        }
        backend.loaded("a");

        assert!(backend.evict(None));
        assert_eq!(backend.keys(), vec!["c", "a"]);
    }

    #[test]
    fn test_evict_skips_excluded_key() {
        let mut backend = MemoryBackend::unbounded();
        backend.write("a", raw_entry(json!(1), None)).unwrap();
        backend.write("b", raw_entry(json!(2), None)).unwrap();

        assert!(backend.evict(Some("a")));
        assert_eq!(backend.keys(), vec!["a"]);

        // The excluded key is the only one left
        assert!(!backend.evict(Some("a")));
        assert!(backend.has("a"));
    }

    #[test]
    fn test_evict_empty() {
        let mut backend = MemoryBackend::unbounded();
        assert!(!backend.evict(None));
    }

    #[test]
    fn test_rewrite_moves_key_to_most_recent() {
        let mut backend = MemoryBackend::unbounded();
        backend.write("a", raw_entry(json!(1), None)).unwrap();
        backend.write("b", raw_entry(json!(2), None)).unwrap();
        backend.write("a", raw_entry(json!(3), None)).unwrap();

        assert_eq!(backend.keys(), vec!["b", "a"]);
        assert_eq!(backend.count().unwrap(), 2);
    }

    #[test]
    fn test_items_limit_evicts_one() {
        let mut backend = MemoryBackend::new(Some(2), None);
        put(&mut backend, "a", json!(1)).unwrap();
        put(&mut backend, "b", json!(2)).unwrap();
        put(&mut backend, "c", json!(3)).unwrap();

        assert_eq!(backend.keys(), vec!["b", "c"]);
    }

    #[test]
    fn test_items_limit_allows_overwrite_without_eviction() {
        let mut backend = MemoryBackend::new(Some(2), None);
        put(&mut backend, "a", json!(1)).unwrap();
        put(&mut backend, "b", json!(2)).unwrap();
        put(&mut backend, "a", json!(10)).unwrap();

        assert_eq!(backend.count().unwrap(), 2);
        assert!(backend.has("a") && backend.has("b"));
    }

    #[test]
    fn test_zero_items_limit_rejects_everything() {
        let mut backend = MemoryBackend::new(Some(0), None);
        let err = backend
            .prepare_save("a", &raw_entry(json!(1), None))
            .unwrap_err();
        assert!(matches!(err, CacheError::ItemsLimitExceeded { limit: 0 }));
    }

    #[test]
    fn test_oversized_value_rejected_on_empty_store() {
        let mut backend = MemoryBackend::new(None, Some(16));
        let err = backend
            .prepare_save("big", &raw_entry(json!("tiny"), None))
            .unwrap_err();

        assert!(matches!(
            err,
            CacheError::MemoryLimitExceeded { limit: 16, .. }
        ));
        assert_eq!(backend.count().unwrap(), 0);
    }

    #[test]
    fn test_memory_limit_evicts_until_fit() {
        let value = json!("x".repeat(100));
        let entry_size = codec::encoded_len(&raw_entry(value.clone(), None));
        let mut backend = MemoryBackend::new(None, Some(2 * entry_size + 50));

        put(&mut backend, "a", value.clone()).unwrap();
        put(&mut backend, "b", value.clone()).unwrap();
        assert_eq!(backend.memory_usage(), 2 * entry_size);

        put(&mut backend, "c", value).unwrap();
        assert_eq!(backend.keys(), vec!["b", "c"]);
    }

    #[test]
    fn test_memory_limit_counts_whole_entry() {
        // The value alone fits in 64 bytes, the stored entry does not
        let value = json!("x".repeat(40));
        assert!(codec::encoded_len(&value) < 64);

        let mut backend = MemoryBackend::new(None, Some(64));
        let err = put(&mut backend, "k", value).unwrap_err();

        assert!(matches!(
            err,
            CacheError::MemoryLimitExceeded { limit: 64, required } if required > 64
        ));
        assert_eq!(backend.count().unwrap(), 0);
        assert_eq!(backend.memory_usage(), 0);
    }

    #[test]
    fn test_memory_usage_stays_within_limit() {
        let limit = 600;
        let mut backend = MemoryBackend::new(None, Some(limit));

        for (i, len) in [10, 80, 150, 5, 200, 60, 120, 1, 90].into_iter().enumerate() {
            let key = format!("k{}", i % 4);
            put(&mut backend, &key, json!("v".repeat(len))).unwrap();
            assert!(backend.memory_usage() <= limit);
        }
    }

    #[test]
    fn test_memory_limit_rewrite_uses_net_delta() {
        let big = raw_entry(json!("y".repeat(100)), None);
        let small = raw_entry(json!(1), None);
        let big_size = codec::encoded_len(&big);
        let small_size = codec::encoded_len(&small);
        let limit = big_size + small_size;

        let mut backend = MemoryBackend::new(None, Some(limit));
        backend.prepare_save("a", &big).unwrap();
        backend.write("a", big.clone()).unwrap();
        backend.prepare_save("b", &small).unwrap();
        backend.write("b", small).unwrap();
        assert_eq!(backend.memory_usage(), limit);

        // Same-size rewrite replaces the old bytes, nothing is evicted
        backend.prepare_save("a", &big).unwrap();
        assert_eq!(backend.keys(), vec!["a", "b"]);

        // Ten bytes larger: only "b" has to go, "a" keeps its slot
        let bigger = raw_entry(json!("y".repeat(110)), None);
        assert_eq!(codec::encoded_len(&bigger), big_size + 10);
        backend.prepare_save("a", &bigger).unwrap();
        assert_eq!(backend.keys(), vec!["a"]);
        assert_eq!(backend.memory_usage(), big_size);

        backend.write("a", bigger).unwrap();
        assert_eq!(backend.memory_usage(), big_size + 10);
        assert!(backend.memory_usage() <= limit);
    }

    #[test]
    fn test_evictions_are_not_rolled_back() {
        let mut backend = MemoryBackend::new(Some(1), Some(64));
        backend.write("a", raw_entry(json!(1), None)).unwrap();

        let err = backend
            .prepare_save("b", &raw_entry(json!("z".repeat(200)), None))
            .unwrap_err();

        assert!(matches!(err, CacheError::MemoryLimitExceeded { .. }));
        assert!(!backend.has("a"));
        assert_eq!(backend.count().unwrap(), 0);
    }

    #[test]
    fn test_clean_removes_expired_and_invalid() {
        let mut backend = MemoryBackend::unbounded();
        backend.write("fresh", raw_entry(json!(1), Some(3600))).unwrap();
        backend.write("forever", raw_entry(json!(2), None)).unwrap();
        backend.write("expired", raw_entry(json!(3), Some(0))).unwrap();
        backend.write("broken", json!({"value": 4})).unwrap();

        assert_eq!(backend.clean().unwrap(), 2);
        let mut keys = backend.keys();
        keys.sort();
        assert_eq!(keys, vec!["forever", "fresh"]);
    }

    #[test]
    fn test_flush() {
        let mut backend = MemoryBackend::unbounded();
        backend.write("a", raw_entry(json!(1), None)).unwrap();
        backend.flush().unwrap();

        assert_eq!(backend.count().unwrap(), 0);
        assert_eq!(backend.memory_usage(), 0);
        assert!(backend.keys().is_empty());
    }
}
