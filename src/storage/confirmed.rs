//! Confirmed header record.
//!
//! Confirmed headers live in fixed buckets of 100 heights (`headers/{start}-{end}`),
//! each a JSON object mapping height to raw header hex. Buckets touched during a call
//! are pulled into memory once and staged back as a whole. Entries are never
//! modified after they are written.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::types::HighestValidatedHeader;
use crate::storage::{bucket_key, headers_key, read_json, KvStore, StorageError, WriteSet, KEY_HIGHEST_HEADER};

type Bucket = BTreeMap<u64, String>;

#[derive(Debug, Default)]
pub struct ConfirmedHeaders {
    buckets: BTreeMap<String, Bucket>,
    dirty: BTreeSet<String>,
    highest: Option<HighestValidatedHeader>,
    highest_dirty: bool,
}

impl ConfirmedHeaders {
    /// Start a view over the store, reading only the highest header pointer.
    pub fn load<S: KvStore + ?Sized>(store: &S) -> Result<Self, StorageError> {
        Ok(ConfirmedHeaders {
            highest: read_json(store, KEY_HIGHEST_HEADER)?,
            ..Default::default()
        })
    }

    fn bucket<S: KvStore + ?Sized>(&mut self, store: &S, height: u64) -> Result<&mut Bucket, StorageError> {
        let key = bucket_key(height);
        if !self.buckets.contains_key(&key) {
            tracing::debug!("Pulling confirmed headers into memory {}", key);
            let pulled: Bucket = read_json(store, &headers_key(&key))?.unwrap_or_default();
            self.buckets.insert(key.clone(), pulled);
        }
        Ok(self.buckets.entry(key).or_default())
    }

    /// Raw header confirmed at `height`
    pub fn get<S: KvStore + ?Sized>(&mut self, store: &S, height: u64) -> Result<Option<String>, StorageError> {
        Ok(self.bucket(store, height)?.get(&height).cloned())
    }

    /// Record a confirmed header. Returns false, leaving the record untouched, when the
    /// height is already taken.
    pub fn insert<S: KvStore + ?Sized>(&mut self, store: &S, height: u64, raw: &str) -> Result<bool, StorageError> {
        let bucket = self.bucket(store, height)?;
        if bucket.contains_key(&height) {
            return Ok(false);
        }
        bucket.insert(height, raw.to_string());
        self.dirty.insert(bucket_key(height));
        Ok(true)
    }

    pub fn highest(&self) -> Option<&HighestValidatedHeader> {
        self.highest.as_ref()
    }

    pub fn set_highest(&mut self, height: u64, header_hash: String) {
        self.highest = Some(HighestValidatedHeader { height, header_hash });
        self.highest_dirty = true;
    }

    /// Stage every modified bucket and the highest header pointer.
    pub fn stage(&self, writes: &mut WriteSet) -> Result<(), StorageError> {
        for key in &self.dirty {
            if let Some(bucket) = self.buckets.get(key) {
                tracing::debug!("Adding headers to db for key {}", key);
                writes.put_json(headers_key(key), bucket)?;
            }
        }
        if self.highest_dirty {
            if let Some(highest) = &self.highest {
                writes.put_json(KEY_HIGHEST_HEADER, highest)?;
            }
        }
        Ok(())
    }
}
