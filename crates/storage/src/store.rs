//! Sharded in-memory store with secondary index maintenance.
//!
//! `InMemStore` is the façade over a fixed set of shards plus an
//! [`IndexManager`](crate::index::IndexManager). Keys are routed with
//! FNV-1a 64 modulo the shard count (a power of two fixed at construction),
//! so a key is owned by exactly one shard for its lifetime.
//!
//! # Locking
//!
//! Shards are independent `RwLock`s; operations on disjoint shards run
//! concurrently. The index manager has its own lock and is always acquired
//! *after* a shard lock, never the other way around, so the two can't
//! deadlock.
//!
//! Expired items are filtered at read time; the periodic sweep
//! (`clean_expired_items`) is what actually removes them.

use crate::index::IndexManager;
use crate::shard::{Shard, StagedWrite};
use chrono::{DateTime, Utc};
use ember_core::{document, Item};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a 64-bit hash, the shard-routing function.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// A sharded collection of items with per-field secondary indexes.
pub struct InMemStore {
    shards: Vec<RwLock<Shard>>,
    indexes: IndexManager,
}

impl InMemStore {
    /// Create a store with `shard_count` shards.
    ///
    /// The count must be a power of two in `1..=256`; the config layer
    /// validates this before construction.
    pub fn new(shard_count: usize) -> Self {
        debug_assert!(shard_count.is_power_of_two() && shard_count <= 256);
        let shards = (0..shard_count).map(|_| RwLock::new(Shard::new())).collect();
        InMemStore {
            shards,
            indexes: IndexManager::new(),
        }
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// The shard a key routes to.
    pub fn shard_id(&self, key: &str) -> usize {
        (fnv1a_64(key.as_bytes()) % self.shards.len() as u64) as usize
    }

    /// The store's index manager.
    pub fn indexes(&self) -> &IndexManager {
        &self.indexes
    }

    /// Total number of keys across shards, including expired-but-unswept.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// Check if the store holds no data.
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }

    // ========================================================================
    // Basic operations
    // ========================================================================

    /// Set a key, preserving `created_at` when the key already exists.
    ///
    /// Index maintenance happens via old/new diff in the same critical
    /// section as the data write.
    pub fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let shard = &self.shards[self.shard_id(key)];
        let mut guard = shard.write();

        let old = guard.data.get(key).cloned();
        let created_at = old.as_ref().map(|o| o.created_at).unwrap_or_else(Utc::now);
        let new_item = Item::new(value, created_at, ttl);

        let old_doc = old.as_ref().and_then(|o| document::decode(&o.value));
        let new_doc = document::decode(&new_item.value);

        guard.data.insert(key.to_string(), new_item);
        self.indexes
            .reindex_document(key, old_doc.as_ref(), new_doc.as_ref());
    }

    /// Insert an item verbatim (load/restore path): `created_at` and `ttl`
    /// come from the caller, not the clock.
    pub fn set_item(&self, key: &str, item: Item) {
        let shard = &self.shards[self.shard_id(key)];
        let mut guard = shard.write();

        let old = guard.data.get(key).cloned();
        let old_doc = old.as_ref().and_then(|o| document::decode(&o.value));
        let new_doc = document::decode(&item.value);

        guard.data.insert(key.to_string(), item);
        self.indexes
            .reindex_document(key, old_doc.as_ref(), new_doc.as_ref());
    }

    /// Get a live value. Expired items are filtered, not removed.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Utc::now();
        let guard = self.shards[self.shard_id(key)].read();
        guard
            .data
            .get(key)
            .filter(|item| item.is_live(now))
            .map(|item| item.value.clone())
    }

    /// Get a live item with its metadata.
    pub fn get_item(&self, key: &str) -> Option<Item> {
        let now = Utc::now();
        let guard = self.shards[self.shard_id(key)].read();
        guard
            .data
            .get(key)
            .filter(|item| item.is_live(now))
            .cloned()
    }

    /// Check for a live key.
    pub fn contains(&self, key: &str) -> bool {
        self.get_item(key).is_some()
    }

    /// Fetch many keys, bucketing by shard so each bucket runs under one
    /// read lock.
    pub fn get_many<I, S>(&self, keys: I) -> HashMap<String, Vec<u8>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let now = Utc::now();
        let mut buckets: HashMap<usize, Vec<String>> = HashMap::new();
        for key in keys {
            let key = key.as_ref();
            buckets
                .entry(self.shard_id(key))
                .or_default()
                .push(key.to_string());
        }

        let mut out = HashMap::new();
        for (shard_id, bucket) in buckets {
            let guard = self.shards[shard_id].read();
            for key in bucket {
                if let Some(item) = guard.data.get(&key) {
                    if item.is_live(now) {
                        out.insert(key, item.value.clone());
                    }
                }
            }
        }
        out
    }

    /// Delete a key. The item is removed under the shard write lock; index
    /// removal runs outside the lock using the captured value.
    pub fn delete(&self, key: &str) -> bool {
        let removed = {
            let mut guard = self.shards[self.shard_id(key)].write();
            guard.data.remove(key)
        };

        match removed {
            Some(item) => {
                if let Some(doc) = document::decode(&item.value) {
                    self.indexes.unindex_document(key, &doc);
                }
                true
            }
            None => false,
        }
    }

    /// Snapshot all live items, shard by shard under read locks.
    /// Values are deep copies.
    pub fn get_all(&self) -> Vec<(String, Item)> {
        let now = Utc::now();
        let mut out = Vec::new();
        for shard in &self.shards {
            let guard = shard.read();
            for (key, item) in &guard.data {
                if item.is_live(now) {
                    out.push((key.clone(), item.clone()));
                }
            }
        }
        out
    }

    /// All live keys, for full-scan query plans.
    pub fn all_keys(&self) -> Vec<String> {
        let now = Utc::now();
        let mut out = Vec::new();
        for shard in &self.shards {
            let guard = shard.read();
            out.extend(
                guard
                    .data
                    .iter()
                    .filter(|(_, item)| item.is_live(now))
                    .map(|(k, _)| k.clone()),
            );
        }
        out
    }

    // ========================================================================
    // Maintenance sweeps
    // ========================================================================

    /// Remove expired items, shard by shard, maintaining indexes in the
    /// same critical section. Returns whether anything was removed.
    pub fn clean_expired_items(&self) -> bool {
        let now = Utc::now();
        let mut changed = false;

        for shard in &self.shards {
            let mut guard = shard.write();
            let expired: Vec<String> = guard
                .data
                .iter()
                .filter(|(_, item)| item.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect();

            for key in expired {
                if let Some(item) = guard.data.remove(&key) {
                    if let Some(doc) = document::decode(&item.value) {
                        self.indexes.unindex_document(&key, &doc);
                    }
                    changed = true;
                }
            }
        }
        changed
    }

    /// Evict documents whose `created_at` is strictly before `threshold`
    /// from memory and indexes. The on-disk copy remains queryable through
    /// the cold pass. Returns the number of evicted items.
    pub fn evict_cold_data(&self, threshold: DateTime<Utc>) -> usize {
        let mut evicted = 0;

        for shard in &self.shards {
            let mut guard = shard.write();
            let cold: Vec<String> = guard
                .data
                .iter()
                .filter(|(_, item)| {
                    document::decode(&item.value)
                        .and_then(|doc| document::created_at(&doc))
                        .map(|ts| ts < threshold)
                        .unwrap_or(false)
                })
                .map(|(k, _)| k.clone())
                .collect();

            for key in cold {
                if let Some(item) = guard.data.remove(&key) {
                    if let Some(doc) = document::decode(&item.value) {
                        self.indexes.unindex_document(&key, &doc);
                    }
                    evicted += 1;
                }
            }
        }
        evicted
    }

    // ========================================================================
    // Index lifecycle
    // ========================================================================

    /// Register a secondary index on `field` and backfill it from current
    /// live data.
    pub fn create_index(&self, field: &str) {
        self.indexes.create_field(field);
        let now = Utc::now();
        for shard in &self.shards {
            let guard = shard.read();
            for (key, item) in &guard.data {
                if !item.is_live(now) {
                    continue;
                }
                if let Some(doc) = document::decode(&item.value) {
                    if let Some(value) = doc.get(field) {
                        self.indexes.index_field_value(field, key, value);
                    }
                }
            }
        }
    }

    /// Drop the index on `field`. Returns whether it existed.
    pub fn drop_index(&self, field: &str) -> bool {
        self.indexes.drop_field(field)
    }

    /// Wipe all data, staged writes, key locks, and index definitions.
    /// Used by the destructive restore path.
    pub fn clear(&self) {
        for shard in &self.shards {
            let mut guard = shard.write();
            guard.data.clear();
            guard.key_locks.clear();
            guard.staged.clear();
        }
        self.indexes.clear();
    }

    // ========================================================================
    // Two-phase commit hooks
    // ========================================================================

    /// Atomically acquire key locks in one shard for a transaction.
    ///
    /// All-or-nothing within the shard; on failure returns the holder's id
    /// and acquires nothing.
    pub fn try_lock_keys(&self, shard_id: usize, tx: Uuid, keys: &[&str]) -> Result<(), Uuid> {
        self.shards[shard_id].write().try_lock_keys(tx, keys)
    }

    /// Stage writes in one shard for a prepared transaction. No visible
    /// change until `publish`.
    pub fn stage(&self, shard_id: usize, tx: Uuid, writes: Vec<StagedWrite>) {
        self.shards[shard_id].write().stage(tx, writes);
    }

    /// Publish a transaction's staged writes in one shard: apply each to
    /// the data map and the indexes (diffing against the pre-read old
    /// value), releasing that key's lock as it lands.
    pub fn publish(&self, shard_id: usize, tx: Uuid) {
        let mut guard = self.shards[shard_id].write();
        let staged = guard.take_staged(tx);

        for write in staged {
            match write {
                StagedWrite::Put { key, mut item } => {
                    let old = guard.data.get(&key).cloned();
                    // Updates keep the original creation time
                    if let Some(old_item) = &old {
                        item.created_at = old_item.created_at;
                    }
                    let old_doc = old.as_ref().and_then(|o| document::decode(&o.value));
                    let new_doc = document::decode(&item.value);

                    guard.data.insert(key.clone(), item);
                    self.indexes
                        .reindex_document(&key, old_doc.as_ref(), new_doc.as_ref());
                    guard.unlock_key(tx, &key);
                }
                StagedWrite::Delete { key } => {
                    let old = guard.data.remove(&key);
                    if let Some(doc) = old.as_ref().and_then(|o| document::decode(&o.value)) {
                        self.indexes.unindex_document(&key, &doc);
                    }
                    guard.unlock_key(tx, &key);
                }
            }
        }

        // Clear any residue (locks taken for keys that never staged a write)
        guard.release_tx(tx);
    }

    /// Discard a transaction's staged writes and key locks in every shard.
    pub fn rollback_tx(&self, tx: Uuid) {
        for shard in &self.shards {
            shard.write().release_tx(tx);
        }
    }

    /// Whether a key is currently lock-held by any transaction.
    pub fn is_key_locked(&self, key: &str) -> bool {
        self.shards[self.shard_id(key)].read().is_locked(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn store() -> InMemStore {
        InMemStore::new(16)
    }

    fn doc_bytes(v: &Value) -> Vec<u8> {
        serde_json::to_vec(v).unwrap()
    }

    #[test]
    fn test_fnv1a_64_known_vectors() {
        // Standard FNV-1a test vectors
        assert_eq!(fnv1a_64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn test_set_get_round_trip() {
        let s = store();
        s.set("u:1", br#"{"n":"A"}"#.to_vec(), Duration::ZERO);
        assert_eq!(s.get("u:1"), Some(br#"{"n":"A"}"#.to_vec()));
        assert_eq!(s.get("u:2"), None);
    }

    #[test]
    fn test_update_preserves_created_at() {
        let s = store();
        s.set("k", b"v1".to_vec(), Duration::ZERO);
        let first = s.get_item("k").unwrap().created_at;

        std::thread::sleep(std::time::Duration::from_millis(5));
        s.set("k", b"v2".to_vec(), Duration::ZERO);
        let second = s.get_item("k").unwrap();

        assert_eq!(second.created_at, first);
        assert_eq!(second.value, b"v2");
    }

    #[test]
    fn test_ttl_expiry_filters_reads() {
        let s = store();
        let old = Item::new(
            b"x".to_vec(),
            Utc::now() - chrono::Duration::seconds(10),
            Duration::from_secs(1),
        );
        s.set_item("k", old);

        assert_eq!(s.get("k"), None);
        assert!(s.get_all().is_empty());
        // Filtered, not removed: the sweep does the removal
        assert_eq!(s.len(), 1);
        assert!(s.clean_expired_items());
        assert_eq!(s.len(), 0);
    }

    #[test]
    fn test_get_many_buckets_by_shard() {
        let s = store();
        for i in 0..50 {
            s.set(
                &format!("k{}", i),
                format!("v{}", i).into_bytes(),
                Duration::ZERO,
            );
        }
        let keys: Vec<String> = (0..50).map(|i| format!("k{}", i)).collect();
        let got = s.get_many(keys.iter());
        assert_eq!(got.len(), 50);
        assert_eq!(got["k7"], b"v7");
    }

    #[test]
    fn test_delete_removes_from_index() {
        let s = store();
        s.create_index("age");
        s.set("d1", doc_bytes(&json!({"age": 30})), Duration::ZERO);
        assert!(s.indexes().lookup("age", &json!(30)).unwrap().contains("d1"));

        assert!(s.delete("d1"));
        assert!(s.indexes().lookup("age", &json!(30)).unwrap().is_empty());
        assert!(!s.delete("d1"));
    }

    #[test]
    fn test_set_diffs_index() {
        let s = store();
        s.create_index("age");
        s.set("d1", doc_bytes(&json!({"age": 30})), Duration::ZERO);
        s.set("d1", doc_bytes(&json!({"age": 31})), Duration::ZERO);

        assert!(s.indexes().lookup("age", &json!(30)).unwrap().is_empty());
        assert!(s.indexes().lookup("age", &json!(31)).unwrap().contains("d1"));
    }

    #[test]
    fn test_non_json_values_not_indexed() {
        let s = store();
        s.create_index("age");
        s.set("raw", vec![0xde, 0xad], Duration::ZERO);
        assert_eq!(s.get("raw"), Some(vec![0xde, 0xad]));
    }

    #[test]
    fn test_create_index_backfills() {
        let s = store();
        for age in 1..=5 {
            s.set(
                &format!("d{}", age),
                doc_bytes(&json!({"age": age})),
                Duration::ZERO,
            );
        }
        s.create_index("age");
        assert!(s.indexes().lookup("age", &json!(3)).unwrap().contains("d3"));
    }

    #[test]
    fn test_evict_cold_data() {
        let s = store();
        s.create_index("age");
        let old_doc = json!({
            "age": 50,
            "created_at": "2019-06-01T00:00:00.000000Z"
        });
        let new_doc = json!({"age": 20, "created_at": ember_core::document::format_timestamp(Utc::now())});
        s.set("old", doc_bytes(&old_doc), Duration::ZERO);
        s.set("new", doc_bytes(&new_doc), Duration::ZERO);

        let threshold = Utc::now() - chrono::Duration::days(365);
        let evicted = s.evict_cold_data(threshold);

        assert_eq!(evicted, 1);
        assert_eq!(s.get("old"), None);
        assert!(s.get("new").is_some());
        assert!(s.indexes().lookup("age", &json!(50)).unwrap().is_empty());
    }

    #[test]
    fn test_publish_applies_staged_and_unlocks() {
        let s = store();
        s.create_index("age");
        let tx = Uuid::new_v4();
        let key = "d1";
        let shard = s.shard_id(key);

        s.try_lock_keys(shard, tx, &[key]).unwrap();
        assert!(s.is_key_locked(key));

        s.stage(
            shard,
            tx,
            vec![StagedWrite::Put {
                key: key.into(),
                item: Item::now(doc_bytes(&json!({"age": 9})), Duration::ZERO),
            }],
        );
        // Staged writes are invisible
        assert_eq!(s.get(key), None);

        s.publish(shard, tx);
        assert!(s.get(key).is_some());
        assert!(!s.is_key_locked(key));
        assert!(s.indexes().lookup("age", &json!(9)).unwrap().contains(key));
    }

    #[test]
    fn test_publish_preserves_created_at_on_overwrite() {
        let s = store();
        s.set("k", b"v1".to_vec(), Duration::ZERO);
        let original = s.get_item("k").unwrap().created_at;

        let tx = Uuid::new_v4();
        let shard = s.shard_id("k");
        s.try_lock_keys(shard, tx, &["k"]).unwrap();
        s.stage(
            shard,
            tx,
            vec![StagedWrite::Put {
                key: "k".into(),
                item: Item::new(
                    b"v2".to_vec(),
                    Utc::now() + chrono::Duration::seconds(60),
                    Duration::ZERO,
                ),
            }],
        );
        s.publish(shard, tx);

        assert_eq!(s.get_item("k").unwrap().created_at, original);
    }

    #[test]
    fn test_rollback_clears_locks_everywhere() {
        let s = store();
        let tx = Uuid::new_v4();
        for key in ["a", "b", "c", "d"] {
            let shard = s.shard_id(key);
            s.try_lock_keys(shard, tx, &[key]).unwrap();
        }
        s.rollback_tx(tx);
        for key in ["a", "b", "c", "d"] {
            assert!(!s.is_key_locked(key));
        }
    }

    #[test]
    fn test_conflicting_lock_fails_fast() {
        let s = store();
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();
        let shard = s.shard_id("x");

        s.try_lock_keys(shard, t1, &["x"]).unwrap();
        assert_eq!(s.try_lock_keys(shard, t2, &["x"]).unwrap_err(), t1);
    }
}
