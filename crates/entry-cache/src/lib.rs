//! Key/value cache with TTL expiration over pluggable storage
//!
//! A [`CacheDriver`] provides the cache API (load, save, remember, counters,
//! batch helpers, sweeps) on top of a [`CacheBackend`]. Two backends ship
//! with the crate:
//!
//! - [`FileBackend`]: one self-describing file per entry in a two-level
//!   hash-sharded directory tree
//! - [`MemoryBackend`]: process-local map with LRU eviction bounded by item
//!   count and encoded byte size
//!
//! ```no_run
//! use entry_cache::{CacheDriver, FileBackend};
//!
//! let mut cache = CacheDriver::new(FileBackend::new("./cache/entries"));
//! cache.save("greeting", "hello", Some(60))?;
//! let greeting: String = cache.load("greeting")?;
//! # Ok::<(), entry_cache::CacheError>(())
//! ```

mod backend;
pub mod codec;
mod config;
mod driver;
pub mod entry;
mod error;
mod file;
mod memory;
mod types;

pub use backend::CacheBackend;
pub use config::{open, BackendKind, CacheConfig};
pub use driver::CacheDriver;
pub use entry::{CacheEntry, EntryMetadata};
pub use error::{CacheError, ErrorKind, Result};
pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use types::CacheStats;
