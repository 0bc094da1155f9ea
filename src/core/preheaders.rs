use std::collections::BTreeMap;

use crate::core::types::Header;
use crate::storage::{read_json, KvStore, StorageError, WriteSet, KEY_PREHEADERS};

/// Headers that passed proof-of-work and linked to a known parent but are not yet
/// confirmed, keyed by their hash (display order, hex).
#[derive(Debug, Default, Clone)]
pub struct PreHeaders {
    entries: BTreeMap<String, Header>,
}

impl PreHeaders {
    pub fn new() -> Self { Self::default() }

    pub fn load<S: KvStore + ?Sized>(store: &S) -> Result<Self, StorageError> {
        let entries = read_json(store, KEY_PREHEADERS)?.unwrap_or_default();
        Ok(PreHeaders { entries })
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn get(&self, hash: &str) -> Option<&Header> { self.entries.get(hash) }
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Header)> { self.entries.iter() }

    pub fn insert(&mut self, hash: String, header: Header) {
        self.entries.insert(hash, header);
    }

    /// Hash of the pending header at `height`, if exactly one entry sits there
    pub fn hash_at_height(&self, height: u64) -> Option<&str> {
        let mut found = self.entries.iter().filter(|(_, h)| h.height == height);
        match (found.next(), found.next()) {
            (Some((hash, _)), None) => Some(hash.as_str()),
            _ => None,
        }
    }

    /// Drop every entry at or below the highest confirmed height.
    pub fn prune_confirmed(&mut self, highest_height: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, header| {
            let keep = header.height > highest_height;
            if !keep {
                tracing::debug!("Deleting preheader {}", header.height);
            }
            keep
        });
        before - self.entries.len()
    }

    pub fn stage(&self, writes: &mut WriteSet) -> Result<(), StorageError> {
        writes.put_json(KEY_PREHEADERS, &self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use num_bigint::BigUint;

    fn header(height: u64) -> Header {
        Header {
            prev_hash: [height as u8; 32],
            timestamp: 1_231_006_505 + height,
            merkle_root: [0xAB; 32],
            period_target: BigUint::from(1u32) << 224usize,
            raw_target: BigUint::from(1u32) << 224usize,
            height,
            raw: "00".repeat(80),
        }
    }

    #[test]
    fn test_prune_confirmed() {
        let mut pre = PreHeaders::new();
        for h in 0..5 {
            pre.insert(format!("{:064x}", h), header(h));
        }
        assert_eq!(pre.prune_confirmed(2), 3);
        assert_eq!(pre.len(), 2);
        assert!(pre.iter().all(|(_, h)| h.height > 2));
    }

    #[test]
    fn test_stage_and_reload() {
        let mut pre = PreHeaders::new();
        pre.insert("aa".repeat(32), header(3));
        let mut writes = WriteSet::new();
        pre.stage(&mut writes).unwrap();

        let mut store = MemoryStore::new();
        store.commit(writes).unwrap();
        let reloaded = PreHeaders::load(&store).unwrap();
        assert_eq!(reloaded.get(&"aa".repeat(32)), Some(&header(3)));

        let raw: serde_json::Value = serde_json::from_str(&store.get(KEY_PREHEADERS).unwrap().unwrap()).unwrap();
        let entry = &raw["aa".repeat(32)];
        assert_eq!(entry["height"], 3);
        assert_eq!(entry["prevHash"], "03".repeat(32));
        assert!(entry["rawTarget"].is_string());
    }

    #[test]
    fn test_hash_at_height_requires_single_entry() {
        let mut pre = PreHeaders::new();
        pre.insert("01".repeat(32), header(0));
        assert_eq!(pre.hash_at_height(0), Some("01".repeat(32).as_str()));
        pre.insert("02".repeat(32), header(0));
        assert_eq!(pre.hash_at_height(0), None);
    }

    #[test]
    fn test_missing_key_loads_empty() {
        let store = MemoryStore::new();
        assert!(PreHeaders::load(&store).unwrap().is_empty());
    }
}
