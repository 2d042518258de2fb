//! Cache types

use serde::{Deserialize, Serialize};

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Stored entries, including ones not yet swept
    pub entries: usize,
    /// Bytes on disk (file backend) or encoded bytes in memory
    pub total_size: u64,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Fraction of loads that were hits
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
