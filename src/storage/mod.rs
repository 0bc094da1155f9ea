use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::Db;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::core::params::HEADER_BUCKET_SIZE;

pub mod confirmed;

/// Keys the relay keeps its state under
pub const KEY_PREHEADERS: &str = "pre-headers/main";
pub const KEY_DIFFICULTY_PARAMS: &str = "last_difficulty_period_params";
pub const KEY_HIGHEST_HEADER: &str = "highest_validated_header";
pub const KEY_VALIDITY_DEPTH: &str = "validity_depth";
const PREFIX_HEADERS: &str = "headers/";

/// String key-value store the relay persists into. Values are JSON documents.
pub trait KvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Apply every staged write. Implementations that can do so apply them atomically.
    fn commit(&mut self, writes: WriteSet) -> Result<(), StorageError> {
        for (key, value) in writes {
            self.set(&key, &value)?;
        }
        Ok(())
    }
}

// ─── Write Staging ───────────────────────────────────────────────────

/// Writes produced by one relay call, applied only once the call succeeds
#[derive(Debug, Default, Clone)]
pub struct WriteSet {
    writes: BTreeMap<String, String>,
}

impl WriteSet {
    pub fn new() -> Self { Self::default() }

    pub fn put(&mut self, key: impl Into<String>, value: String) {
        self.writes.insert(key.into(), value);
    }

    pub fn put_json<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<(), StorageError> {
        self.put(key, to_json(value)?);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> { self.writes.get(key).map(String::as_str) }
    pub fn len(&self) -> usize { self.writes.len() }
    pub fn is_empty(&self) -> bool { self.writes.is_empty() }
}

impl IntoIterator for WriteSet {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.writes.into_iter()
    }
}

// ─── Backends ────────────────────────────────────────────────────────

/// Volatile store, used by tests and dry runs
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn keys(&self) -> impl Iterator<Item = &String> { self.entries.keys() }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Persistent storage backend using sled embedded database
pub struct SledStore {
    db: Db,
}

impl SledStore {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| StorageError::DbError(e.to_string()))?;
        Ok(SledStore { db })
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(|e| StorageError::DbError(e.to_string()))?;
        Ok(())
    }
}

impl KvStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.db.get(key.as_bytes()).map_err(|e| StorageError::DbError(e.to_string()))? {
            Some(bytes) => {
                let value = String::from_utf8(bytes.to_vec())
                    .map_err(|e| StorageError::SerializeError(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.db.insert(key.as_bytes(), value.as_bytes())
            .map_err(|e| StorageError::DbError(e.to_string()))?;
        Ok(())
    }

    fn commit(&mut self, writes: WriteSet) -> Result<(), StorageError> {
        let mut batch = sled::Batch::default();
        for (key, value) in writes {
            batch.insert(key.as_bytes(), value.as_bytes());
        }
        self.db.apply_batch(batch).map_err(|e| StorageError::DbError(e.to_string()))?;
        self.flush()
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────

/// Bucket holding `height`, e.g. `"201500-201600"`
pub fn bucket_key(height: u64) -> String {
    let start = (height / HEADER_BUCKET_SIZE) * HEADER_BUCKET_SIZE;
    format!("{}-{}", start, start + HEADER_BUCKET_SIZE)
}

/// Store key of a confirmed-header bucket
pub fn headers_key(bucket: &str) -> String {
    format!("{}{}", PREFIX_HEADERS, bucket)
}

/// Read and decode a JSON value, `None` when the key was never written
pub fn read_json<S: KvStore + ?Sized, T: DeserializeOwned>(store: &S, key: &str) -> Result<Option<T>, StorageError> {
    match store.get(key)? {
        Some(raw) => {
            let value = serde_json::from_str(&raw)
                .map_err(|e| StorageError::SerializeError(format!("{}: {}", key, e)))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

pub fn to_json<T: Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::SerializeError(e.to_string()))
}

#[derive(Debug)]
pub enum StorageError {
    DbError(String),
    SerializeError(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::DbError(e) => write!(f, "database error: {}", e),
            StorageError::SerializeError(e) => write!(f, "serialization error: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_key() {
        assert_eq!(bucket_key(0), "0-100");
        assert_eq!(bucket_key(99), "0-100");
        assert_eq!(bucket_key(100), "100-200");
        assert_eq!(bucket_key(201_599), "201500-201600");
        assert_eq!(bucket_key(201_600), "201600-201700");
        assert_eq!(headers_key(&bucket_key(2016)), "headers/2000-2100");
    }

    #[test]
    fn test_memory_store_commit() {
        let mut store = MemoryStore::new();
        let mut writes = WriteSet::new();
        writes.put("a", "1".to_string());
        writes.put_json("b", &vec![1, 2]).unwrap();
        assert_eq!(writes.get("b"), Some("[1,2]"));
        store.commit(writes).unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_read_json_missing_key() {
        let store = MemoryStore::new();
        let value: Option<u64> = read_json(&store, KEY_VALIDITY_DEPTH).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_read_json_rejects_garbage() {
        let mut store = MemoryStore::new();
        store.set(KEY_VALIDITY_DEPTH, "not json").unwrap();
        let value: Result<Option<u64>, _> = read_json(&store, KEY_VALIDITY_DEPTH);
        assert!(matches!(value, Err(StorageError::SerializeError(_))));
    }

    #[test]
    fn test_sled_store_batch_commit() {
        let dir = std::env::temp_dir().join(format!("btc_relay_sled_{}", std::process::id()));
        {
            let mut store = SledStore::open(&dir).unwrap();
            let mut writes = WriteSet::new();
            writes.put(KEY_VALIDITY_DEPTH, "6".to_string());
            writes.put(headers_key("0-100"), "{}".to_string());
            store.commit(writes).unwrap();
            assert_eq!(store.get(KEY_VALIDITY_DEPTH).unwrap().as_deref(), Some("6"));
            assert_eq!(store.get("headers/0-100").unwrap().as_deref(), Some("{}"));
            assert!(store.get("missing").unwrap().is_none());
        }
        let _ = std::fs::remove_dir_all(&dir);
    }
}
