//! Sharded file-per-entry storage
//!
//! Entries live at `{root}/{hash[..2]}/{hash}.cache` where `hash` is the
//! hex SHA-256 of the key. Shard directories are created on first write.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::CacheBackend;
use crate::codec;
use crate::entry::{self, EntryState};
use crate::error::{CacheError, Result};

const CACHE_EXTENSION: &str = "cache";

/// Cache backend storing one self-describing file per entry
#[derive(Debug, Clone)]
pub struct FileBackend {
    /// Directory holding the shard tree
    root: PathBuf,
    /// Wait for the write lock instead of failing when it is held
    blocking_lock: bool,
}

impl FileBackend {
    /// Create a backend rooted at `root`. Nothing is touched on disk yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            blocking_lock: true,
        }
    }

    /// Choose between waiting for the write lock or failing fast
    pub fn with_blocking_lock(mut self, blocking: bool) -> Self {
        self.blocking_lock = blocking;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the file backing `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        let hash = codec::key_hash(key);
        self.root
            .join(&hash[..2])
            .join(format!("{}.{}", hash, CACHE_EXTENSION))
    }

    /// Total size of all entry files in bytes
    pub fn disk_usage(&self) -> Result<u64> {
        let mut total = 0;
        for path in self.entry_files()? {
            match fs::metadata(&path) {
                Ok(meta) => total += meta.len(),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(CacheError::FileRead { path, source }),
            }
        }
        Ok(total)
    }

    /// Every `*.cache` file one shard level below the root
    fn entry_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        let shards = match fs::read_dir(&self.root) {
            Ok(shards) => shards,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(files),
            Err(source) => {
                return Err(CacheError::FileRead {
                    path: self.root.clone(),
                    source,
                })
            }
        };

        for shard in shards.flatten() {
            let shard_path = shard.path();
            if !shard_path.is_dir() {
                continue;
            }
            let entries = fs::read_dir(&shard_path).map_err(|source| CacheError::FileRead {
                path: shard_path.clone(),
                source,
            })?;
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_file() && path.extension().is_some_and(|ext| ext == CACHE_EXTENSION) {
                    files.push(path);
                }
            }
        }

        files.sort();
        Ok(files)
    }

    fn lock(&self, file: &File, path: &Path) -> Result<()> {
        let locked = if self.blocking_lock {
            file.lock()
        } else {
            file.try_lock().map_err(io::Error::from)
        };
        locked.map_err(|source| CacheError::FileLock {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Delete everything below `dir`, deepest entries first. `dir` itself stays.
fn remove_tree(dir: &Path) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(CacheError::DirectoryDelete {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    for entry in entries {
        let entry = entry.map_err(|source| CacheError::DirectoryDelete {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|source| CacheError::DirectoryDelete {
                path: path.clone(),
                source,
            })?;

        if file_type.is_dir() {
            remove_tree(&path)?;
            fs::remove_dir(&path).map_err(|source| CacheError::DirectoryDelete { path, source })?;
        } else {
            fs::remove_file(&path).map_err(|source| CacheError::FileDelete { path, source })?;
        }
    }

    Ok(())
}

fn remove_file_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(CacheError::FileDelete {
            path: path.to_path_buf(),
            source,
        }),
    }
}

impl CacheBackend for FileBackend {
    fn has(&self, key: &str) -> bool {
        let path = self.path_for(key);
        fs::metadata(&path).map(|m| m.is_file()).unwrap_or(false) && File::open(&path).is_ok()
    }

    fn read(&self, key: &str) -> Result<Value> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CacheError::KeyNotFound(key.to_string()))
            }
            Err(source) => return Err(CacheError::FileRead { path, source }),
        };

        // `codec::FALSE_ENCODING` parses as a value here and is rejected later
        // as a structural problem, never as corruption.
        codec::decode(&bytes).map_err(|e| CacheError::DataCorrupted {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    fn write(&mut self, key: &str, mut entry: Value) -> Result<()> {
        if let Value::Object(fields) = &mut entry {
            fields.insert("key".to_string(), Value::String(key.to_string()));
        }
        let bytes = codec::encode(&entry)?;

        let path = self.path_for(key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| CacheError::DirectoryCreate {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let write_err = |source| CacheError::FileWrite {
            path: path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(write_err)?;

        self.lock(&file, &path)?;
        file.set_len(0).map_err(write_err)?;
        file.write_all(&bytes).map_err(write_err)?;
        file.flush().map_err(write_err)?;

        debug!(key = %key, path = ?path, size = bytes.len(), "Wrote cache file");
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        if remove_file_if_present(&self.path_for(key))? {
            debug!(key = %key, "Removed cache file");
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        remove_tree(&self.root)?;
        info!(root = ?self.root, "Flushed file cache");
        Ok(())
    }

    fn clean(&mut self) -> Result<usize> {
        let now = entry::now();
        let mut removed = 0;

        for path in self.entry_files()? {
            let label = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();

            let state = match fs::read(&path) {
                Ok(bytes) => match codec::decode(&bytes) {
                    Ok(raw) => {
                        let key = raw
                            .get("key")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .unwrap_or(label);
                        entry::inspect(&key, raw, now)
                    }
                    Err(e) => {
                        warn!(path = ?path, error = %e, "Unparseable cache file");
                        EntryState::Invalid
                    }
                },
                Err(e) => {
                    warn!(path = ?path, error = %e, "Unreadable cache file");
                    EntryState::Invalid
                }
            };

            if state != EntryState::Valid && remove_file_if_present(&path)? {
                removed += 1;
            }
        }

        info!(root = ?self.root, removed, "Cleaned file cache");
        Ok(removed)
    }

    fn count(&self) -> Result<usize> {
        Ok(self.entry_files()?.len())
    }

    fn size_bytes(&self) -> Result<u64> {
        self.disk_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::CacheEntry;
    use serde_json::json;
    use tempfile::tempdir;

    fn raw_entry(value: Value, ttl: Option<i64>) -> Value {
        CacheEntry::new(value, ttl, entry::now())
            .unwrap()
            .to_raw()
            .unwrap()
    }

    fn write_bytes(backend: &FileBackend, key: &str, bytes: &[u8]) {
        let path = backend.path_for(key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_path_layout() {
        let backend = FileBackend::new("/var/cache/app");
        let hash = codec::key_hash("user:1");
        let path = backend.path_for("user:1");

        assert_eq!(
            path,
            PathBuf::from("/var/cache/app")
                .join(&hash[..2])
                .join(format!("{}.cache", hash))
        );
    }

    #[test]
    fn test_write_creates_shard_and_injects_key() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::new(dir.path().join("nested/root"));

        backend.write("k", raw_entry(json!("v"), None)).unwrap();

        let path = backend.path_for("k");
        assert!(path.is_file());
        let stored: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(stored["key"], "k");
        assert_eq!(stored["value"], "v");
        assert_eq!(stored.as_object().unwrap().len(), 5);
    }

    #[test]
    fn test_has_and_read() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::new(dir.path());

        assert!(!backend.has("k"));
        backend.write("k", raw_entry(json!([1, 2]), None)).unwrap();
        assert!(backend.has("k"));
        assert_eq!(backend.read("k").unwrap()["value"], json!([1, 2]));
    }

    #[test]
    fn test_read_missing_key() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        assert!(matches!(
            backend.read("nope"),
            Err(CacheError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_read_garbage_is_corrupted() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        write_bytes(&backend, "k", b"\x89PNG not json");

        assert!(matches!(
            backend.read("k"),
            Err(CacheError::DataCorrupted { .. })
        ));
    }

    #[test]
    fn test_read_false_encoding_is_not_corruption() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        write_bytes(&backend, "k", codec::FALSE_ENCODING);

        let raw = backend.read("k").unwrap();
        assert_eq!(raw, Value::Bool(false));
        assert!(matches!(
            CacheEntry::from_raw("k", raw),
            Err(CacheError::InvalidDataStructure { .. })
        ));
    }

    #[test]
    fn test_overwrite_replaces_whole_file() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::new(dir.path());

        backend
            .write("k", raw_entry(json!("a much longer first value"), None))
            .unwrap();
        backend.write("k", raw_entry(json!("short"), None)).unwrap();

        assert_eq!(backend.read("k").unwrap()["value"], "short");
        assert_eq!(backend.count().unwrap(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::new(dir.path());

        backend.write("k", raw_entry(json!(1), None)).unwrap();
        backend.remove("k").unwrap();
        backend.remove("k").unwrap();
        assert!(!backend.has("k"));
    }

    #[test]
    fn test_flush_removes_shards_but_keeps_root() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::new(dir.path());

        for i in 0..10 {
            backend
                .write(&format!("key-{}", i), raw_entry(json!(i), None))
                .unwrap();
        }
        backend.flush().unwrap();

        assert!(dir.path().is_dir());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(backend.count().unwrap(), 0);
    }

    #[test]
    fn test_flush_removes_nested_directories() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::new(dir.path());
        backend.write("k", raw_entry(json!(1), None)).unwrap();

        let deep = dir.path().join("stray/a/b");
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("leftover.tmp"), b"x").unwrap();
        fs::write(dir.path().join("stray/notes"), b"y").unwrap();

        backend.flush().unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_remove_tree_reports_unlistable_path() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain-file");
        fs::write(&file, b"not a directory").unwrap();

        let err = remove_tree(&file).unwrap_err();
        assert!(matches!(err, CacheError::DirectoryDelete { .. }));
        assert!(file.exists());
    }

    #[test]
    fn test_flush_on_missing_root() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::new(dir.path().join("never-created"));
        backend.flush().unwrap();
    }

    #[test]
    fn test_clean_counts_expired_and_unparseable() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::new(dir.path());

        for i in 0..3 {
            backend
                .write(&format!("valid-{}", i), raw_entry(json!(i), Some(3600)))
                .unwrap();
        }
        for i in 0..2 {
            backend
                .write(&format!("expired-{}", i), raw_entry(json!(i), Some(0)))
                .unwrap();
        }
        write_bytes(&backend, "garbage-0", b"{{{{");
        write_bytes(&backend, "garbage-1", &[0xff, 0xfe, 0x00]);
        write_bytes(&backend, "garbage-2", b"");

        assert_eq!(backend.clean().unwrap(), 5);
        assert_eq!(backend.count().unwrap(), 3);
        for i in 0..3 {
            assert!(backend.has(&format!("valid-{}", i)));
        }
    }

    #[test]
    fn test_clean_removes_structurally_invalid() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::new(dir.path());

        backend
            .write("partial", json!({"value": 1, "created_at": 0}))
            .unwrap();
        write_bytes(&backend, "false", codec::FALSE_ENCODING);

        assert_eq!(backend.clean().unwrap(), 2);
        assert_eq!(backend.count().unwrap(), 0);
    }

    #[test]
    fn test_disk_usage_sums_file_sizes() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::new(dir.path());
        assert_eq!(backend.disk_usage().unwrap(), 0);

        backend.write("a", raw_entry(json!("x"), None)).unwrap();
        backend.write("b", raw_entry(json!("yy"), None)).unwrap();

        let expected: u64 = ["a", "b"]
            .iter()
            .map(|k| fs::metadata(backend.path_for(k)).unwrap().len())
            .sum();
        assert_eq!(backend.disk_usage().unwrap(), expected);
        assert_eq!(backend.size_bytes().unwrap(), expected);
    }

    #[test]
    fn test_non_blocking_lock_uncontended() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::new(dir.path()).with_blocking_lock(false);
        backend.write("k", raw_entry(json!(true), None)).unwrap();
        assert!(backend.has("k"));
    }

    #[test]
    fn test_non_blocking_lock_contended() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::new(dir.path()).with_blocking_lock(false);
        backend.write("k", raw_entry(json!(1), None)).unwrap();

        let holder = File::open(backend.path_for("k")).unwrap();
        holder.lock().unwrap();

        let err = backend.write("k", raw_entry(json!(2), None)).unwrap_err();
        assert!(matches!(err, CacheError::FileLock { .. }));
    }
}
