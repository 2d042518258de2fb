//! Error types for the entry cache

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Broad category of a [`CacheError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad TTL or backend settings, raised where the value is set
    Configuration,
    /// The in-memory backend could not admit a new entry
    Capacity,
    /// Underlying filesystem failure
    Storage,
    /// A stored entry could not be decoded or is structurally invalid
    Data,
    /// Expected control-flow signals (missing or expired key)
    Runtime,
}

/// Errors that can occur when using a cache
#[derive(Debug)]
pub enum CacheError {
    InvalidTtl(i64),
    Config(String),

    ItemsLimitExceeded { limit: usize },
    MemoryLimitExceeded { limit: u64, required: u64 },

    DirectoryCreate { path: PathBuf, source: io::Error },
    DirectoryDelete { path: PathBuf, source: io::Error },
    FileRead { path: PathBuf, source: io::Error },
    FileWrite { path: PathBuf, source: io::Error },
    FileDelete { path: PathBuf, source: io::Error },
    FileLock { path: PathBuf, source: io::Error },
    Encode(serde_json::Error),

    DataCorrupted { key: String, reason: String },
    InvalidDataStructure { key: String, reason: String },
    MissingRequiredKey { key: String, field: &'static str },
    NonNumericValue { key: String },
    CounterOverflow { key: String },
    ValueType { key: String, source: serde_json::Error },

    KeyNotFound(String),
    KeyExpired(String),
}

impl CacheError {
    /// Category this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::InvalidTtl(_) | CacheError::Config(_) => ErrorKind::Configuration,
            CacheError::ItemsLimitExceeded { .. } | CacheError::MemoryLimitExceeded { .. } => {
                ErrorKind::Capacity
            }
            CacheError::DirectoryCreate { .. }
            | CacheError::DirectoryDelete { .. }
            | CacheError::FileRead { .. }
            | CacheError::FileWrite { .. }
            | CacheError::FileDelete { .. }
            | CacheError::FileLock { .. }
            | CacheError::Encode(_) => ErrorKind::Storage,
            CacheError::DataCorrupted { .. }
            | CacheError::InvalidDataStructure { .. }
            | CacheError::MissingRequiredKey { .. }
            | CacheError::NonNumericValue { .. }
            | CacheError::CounterOverflow { .. }
            | CacheError::ValueType { .. } => ErrorKind::Data,
            CacheError::KeyNotFound(_) | CacheError::KeyExpired(_) => ErrorKind::Runtime,
        }
    }

    /// True for the "nothing usable is stored under this key" family:
    /// missing, expired, or a corrupt entry.
    pub fn is_miss(&self) -> bool {
        matches!(self.kind(), ErrorKind::Runtime | ErrorKind::Data)
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::InvalidTtl(ttl) => {
                write!(f, "Invalid TTL: {} (must be zero or positive)", ttl)
            }
            CacheError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CacheError::ItemsLimitExceeded { limit } => {
                write!(f, "Items limit exceeded: cache holds at most {} entries", limit)
            }
            CacheError::MemoryLimitExceeded { limit, required } => write!(
                f,
                "Memory limit exceeded: {} bytes required, limit is {} bytes",
                required, limit
            ),
            CacheError::DirectoryCreate { path, source } => {
                write!(f, "Failed to create directory {:?}: {}", path, source)
            }
            CacheError::DirectoryDelete { path, source } => {
                write!(f, "Failed to delete directory {:?}: {}", path, source)
            }
            CacheError::FileRead { path, source } => {
                write!(f, "Failed to read {:?}: {}", path, source)
            }
            CacheError::FileWrite { path, source } => {
                write!(f, "Failed to write {:?}: {}", path, source)
            }
            CacheError::FileDelete { path, source } => {
                write!(f, "Failed to delete {:?}: {}", path, source)
            }
            CacheError::FileLock { path, source } => {
                write!(f, "Failed to lock {:?}: {}", path, source)
            }
            CacheError::Encode(err) => write!(f, "Failed to encode entry: {}", err),
            CacheError::DataCorrupted { key, reason } => {
                write!(f, "Data corrupted for key '{}': {}", key, reason)
            }
            CacheError::InvalidDataStructure { key, reason } => {
                write!(f, "Invalid data structure for key '{}': {}", key, reason)
            }
            CacheError::MissingRequiredKey { key, field } => {
                write!(f, "Entry for key '{}' is missing required field '{}'", key, field)
            }
            CacheError::NonNumericValue { key } => {
                write!(f, "Value for key '{}' is not numeric", key)
            }
            CacheError::CounterOverflow { key } => {
                write!(f, "Counter overflow for key '{}'", key)
            }
            CacheError::ValueType { key, source } => {
                write!(f, "Value for key '{}' has an unexpected type: {}", key, source)
            }
            CacheError::KeyNotFound(key) => write!(f, "Key not found: {}", key),
            CacheError::KeyExpired(key) => write!(f, "Key expired: {}", key),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::DirectoryCreate { source, .. }
            | CacheError::DirectoryDelete { source, .. }
            | CacheError::FileRead { source, .. }
            | CacheError::FileWrite { source, .. }
            | CacheError::FileDelete { source, .. }
            | CacheError::FileLock { source, .. } => Some(source),
            CacheError::Encode(err) => Some(err),
            CacheError::ValueType { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Encode(err)
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
