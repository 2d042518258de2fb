//! Cache configuration and backend construction

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::backend::CacheBackend;
use crate::driver::CacheDriver;
use crate::error::{CacheError, Result};
use crate::file::FileBackend;
use crate::memory::MemoryBackend;

/// Which storage a driver is built on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    File,
    Memory,
}

impl FromStr for BackendKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(BackendKind::File),
            "memory" => Ok(BackendKind::Memory),
            other => Err(CacheError::Config(format!(
                "CACHE_DRIVER must be 'file' or 'memory', got '{}'",
                other
            ))),
        }
    }
}

/// Cache configuration, usually parsed from environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub backend: BackendKind,
    pub cache_dir: PathBuf,
    pub default_ttl: Option<i64>,
    pub max_items: Option<usize>,
    pub memory_limit: Option<u64>,
    pub blocking_lock: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::File,
            cache_dir: PathBuf::from("./cache/entries"),
            default_ttl: None,
            max_items: None,
            memory_limit: None,
            blocking_lock: true,
        }
    }
}

/// Parse an optional variable; unset or blank means `None`
fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map(Some).map_err(|_| {
            CacheError::Config(format!("{} has an invalid value: '{}'", name, raw))
        }),
        _ => Ok(None),
    }
}

impl CacheConfig {
    /// Parse configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Parse configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let backend = parse_var(&lookup, "CACHE_DRIVER")?.unwrap_or(defaults.backend);

        let cache_dir = lookup("CACHE_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        let default_ttl: Option<i64> = parse_var(&lookup, "CACHE_DEFAULT_TTL")?;
        if let Some(ttl) = default_ttl.filter(|ttl| *ttl < 0) {
            return Err(CacheError::InvalidTtl(ttl));
        }

        let max_items = parse_var(&lookup, "CACHE_MAX_ITEMS")?;
        let memory_limit = parse_var(&lookup, "CACHE_MEMORY_LIMIT")?;
        let blocking_lock =
            parse_var(&lookup, "CACHE_BLOCKING_LOCK")?.unwrap_or(defaults.blocking_lock);

        Ok(Self {
            backend,
            cache_dir,
            default_ttl,
            max_items,
            memory_limit,
            blocking_lock,
        })
    }

    /// Construct the configured backend
    pub fn build_backend(&self) -> Box<dyn CacheBackend> {
        match self.backend {
            BackendKind::File => Box::new(
                FileBackend::new(self.cache_dir.clone()).with_blocking_lock(self.blocking_lock),
            ),
            BackendKind::Memory => Box::new(MemoryBackend::new(self.max_items, self.memory_limit)),
        }
    }
}

/// Build a driver for `config`
pub fn open(config: &CacheConfig) -> Result<CacheDriver<Box<dyn CacheBackend>>> {
    CacheDriver::with_default_ttl(config.build_backend(), config.default_ttl)
}
