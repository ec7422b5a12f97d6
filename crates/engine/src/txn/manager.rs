//! Transaction manager: begin / record / two-phase commit / rollback.
//!
//! # Commit sequence
//!
//! 1. Atomically move ACTIVE → PREPARING and take the write set.
//! 2. Pre-validate every op against committed state (hot store plus cold
//!    file key probes): SET must not find the key, UPDATE/DELETE must.
//! 3. Enrich: resolve update patches against the stored document, stamp
//!    `updated_at` (and `created_at` for inserts), re-marshal.
//! 4. Acquire per-shard key locks, grouped and ordered by
//!    (collection, shard) so concurrent commits can't deadlock. Acquisition
//!    within a shard is all-or-nothing and fails fast on contention.
//! 5. Stage the resolved writes into each shard. Nothing is visible yet.
//! 6. Append one `TxnCommit` WAL record carrying the enriched write set,
//!    flush, fsync. This is the durability point: a crash before it leaves
//!    no trace, a crash after it replays deterministically.
//! 7. Mark COMMITTED.
//! 8. Publish each shard's staged ops (data + index diff), releasing key
//!    locks as they land.
//! 9. Enqueue an async save per touched collection.
//! 10. Drop the transaction from the registry.
//!
//! Any failure in 2–6 discards staged writes, releases every acquired
//! lock, and surfaces a single error; a failed commit has no partial
//! effects.

use crate::collections::CollectionManager;
use crate::txn::transaction::{Transaction, TxState};
use chrono::Utc;
use ember_core::{document, EmberError, Item, Result, WalEntry, WriteKind, WriteOp};
use ember_durability::WalWriter;
use ember_storage::{InMemStore, StagedWrite};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Registry and coordinator for in-flight transactions.
pub struct TransactionManager {
    registry: Mutex<HashMap<Uuid, Transaction>>,
}

impl TransactionManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        TransactionManager {
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Open a transaction and return its id.
    pub fn begin(&self) -> Uuid {
        let tx = Transaction::new();
        let id = tx.id;
        self.registry.lock().insert(id, tx);
        debug!(tx = %id, "transaction begun");
        id
    }

    /// Append an op to an ACTIVE transaction's write set.
    pub fn record_write(&self, tx_id: Uuid, op: WriteOp) -> Result<()> {
        let mut registry = self.registry.lock();
        let tx = registry
            .get_mut(&tx_id)
            .ok_or_else(|| EmberError::not_found(format!("transaction {}", tx_id)))?;
        if tx.state != TxState::Active {
            return Err(EmberError::conflict(format!(
                "transaction {} is no longer accepting writes",
                tx_id
            )));
        }
        tx.write_set.push(op);
        Ok(())
    }

    /// Whether a transaction is registered (in any state).
    pub fn contains(&self, tx_id: Uuid) -> bool {
        self.registry.lock().contains_key(&tx_id)
    }

    /// Number of registered transactions.
    pub fn len(&self) -> usize {
        self.registry.lock().len()
    }

    /// Check if no transactions are registered.
    pub fn is_empty(&self) -> bool {
        self.registry.lock().is_empty()
    }

    /// Commit a transaction. See the module docs for the full sequence.
    pub fn commit(
        &self,
        tx_id: Uuid,
        collections: &CollectionManager,
        wal: Option<&WalWriter>,
    ) -> Result<()> {
        // Step 1: ACTIVE → PREPARING, take ownership of the write set
        let write_set = {
            let mut registry = self.registry.lock();
            let tx = registry
                .get_mut(&tx_id)
                .ok_or_else(|| EmberError::not_found(format!("transaction {}", tx_id)))?;
            if tx.state != TxState::Active {
                return Err(EmberError::conflict(format!(
                    "transaction {} is not active",
                    tx_id
                )));
            }
            tx.state = TxState::Preparing;
            std::mem::take(&mut tx.write_set)
        };

        if write_set.is_empty() {
            self.registry.lock().remove(&tx_id);
            return Ok(());
        }

        let result = self.run_commit(tx_id, write_set, collections, wal);
        if result.is_err() {
            if let Some(tx) = self.registry.lock().get_mut(&tx_id) {
                tx.state = TxState::Aborted;
            }
        }
        self.registry.lock().remove(&tx_id);
        result
    }

    fn run_commit(
        &self,
        tx_id: Uuid,
        write_set: Vec<WriteOp>,
        collections: &CollectionManager,
        wal: Option<&WalWriter>,
    ) -> Result<()> {
        let now = Utc::now();
        let touched: HashSet<String> = write_set.iter().map(|op| op.collection.clone()).collect();

        // Steps 2–3: pre-validate and enrich. All failures before the lock
        // phase need no shard cleanup.
        let mut resolved: Vec<ResolvedOp> = Vec::with_capacity(write_set.len());
        let mut enriched_ops: Vec<WriteOp> = Vec::with_capacity(write_set.len());

        for op in &write_set {
            let store = collections.get_collection(&op.collection);
            let hot_exists = store.contains(&op.key);
            let exists = hot_exists || collections.cold_key_exists(&op.collection, &op.key)?;

            match op.kind {
                WriteKind::Set => {
                    if exists {
                        return Err(EmberError::conflict(format!(
                            "set on existing key '{}' in '{}'",
                            op.key, op.collection
                        )));
                    }
                    let value = document::enrich(&op.value, now, true)?;
                    resolved.push(ResolvedOp {
                        collection: op.collection.clone(),
                        shard: store.shard_id(&op.key),
                        write: StagedWrite::Put {
                            key: op.key.clone(),
                            item: Item::new(
                                value.clone(),
                                now,
                                Item::ttl_from_seconds(op.ttl_seconds),
                            ),
                        },
                    });
                    enriched_ops.push(WriteOp {
                        value,
                        ..op.clone()
                    });
                }
                WriteKind::Update => {
                    if !exists {
                        return Err(EmberError::conflict(format!(
                            "update on missing key '{}' in '{}'",
                            op.key, op.collection
                        )));
                    }
                    let (old_value, old_ttl) = if hot_exists {
                        let item = store.get_item(&op.key).ok_or_else(|| {
                            EmberError::conflict(format!(
                                "key '{}' in '{}' changed during validation",
                                op.key, op.collection
                            ))
                        })?;
                        (item.value, item.ttl)
                    } else {
                        let value =
                            collections.cold_value(&op.collection, &op.key)?.ok_or_else(|| {
                                EmberError::conflict(format!(
                                    "update on deleted key '{}' in '{}'",
                                    op.key, op.collection
                                ))
                            })?;
                        (value, Duration::ZERO)
                    };
                    let merged = document::merge_patch(&old_value, &op.value)?;
                    let value = document::enrich(&merged, now, false)?;
                    resolved.push(ResolvedOp {
                        collection: op.collection.clone(),
                        shard: store.shard_id(&op.key),
                        write: StagedWrite::Put {
                            key: op.key.clone(),
                            item: Item::new(value.clone(), now, old_ttl),
                        },
                    });
                    enriched_ops.push(WriteOp {
                        value,
                        ..op.clone()
                    });
                }
                WriteKind::Delete => {
                    if !exists {
                        return Err(EmberError::conflict(format!(
                            "delete on missing key '{}' in '{}'",
                            op.key, op.collection
                        )));
                    }
                    resolved.push(ResolvedOp {
                        collection: op.collection.clone(),
                        shard: store.shard_id(&op.key),
                        write: StagedWrite::Delete { key: op.key.clone() },
                    });
                    enriched_ops.push(op.clone());
                }
            }
        }

        // Step 4: lock phase, grouped and ordered by (collection, shard).
        // BTreeMap iteration gives the deterministic acquisition order.
        let mut groups: BTreeMap<(String, usize), Vec<StagedWrite>> = BTreeMap::new();
        for r in resolved {
            groups
                .entry((r.collection, r.shard))
                .or_default()
                .push(r.write);
        }

        let stores: HashMap<String, Arc<InMemStore>> = touched
            .iter()
            .map(|name| (name.clone(), collections.get_collection(name)))
            .collect();

        for ((collection, shard), writes) in &groups {
            let store = &stores[collection];
            let keys: Vec<&str> = writes.iter().map(StagedWrite::key).collect();
            if store.try_lock_keys(*shard, tx_id, &keys).is_err() {
                abort_staging(&stores, tx_id);
                return Err(EmberError::conflict(format!(
                    "key locked by another transaction in '{}'",
                    collection
                )));
            }
        }

        // Step 5: stage. Still invisible.
        for ((collection, shard), writes) in &groups {
            stores[collection].stage(*shard, tx_id, writes.clone());
        }

        // Step 6: WAL append, the durability point
        if let Some(wal) = wal {
            let entry = WalEntry::TxnCommit {
                tx_id,
                ops: enriched_ops,
            };
            if let Err(e) = wal.append(&entry) {
                abort_staging(&stores, tx_id);
                return Err(EmberError::Io {
                    message: format!("WAL append failed, transaction rolled back: {}", e),
                    source: None,
                });
            }
        }

        // Step 7: durable; mark COMMITTED
        if let Some(tx) = self.registry.lock().get_mut(&tx_id) {
            tx.state = TxState::Committed;
        }

        // Step 8: publish (in-memory only, cannot fail)
        for ((collection, shard), _) in &groups {
            stores[collection].publish(*shard, tx_id);
        }

        // Step 9: async save per touched collection, with the deleted keys
        // so the saver can tombstone their file records
        let mut deleted_by_collection: HashMap<String, Vec<String>> = HashMap::new();
        for (collection, _) in groups.keys().cloned() {
            deleted_by_collection.entry(collection).or_default();
        }
        for ((collection, _), writes) in &groups {
            for write in writes {
                if let StagedWrite::Delete { key } = write {
                    deleted_by_collection
                        .entry(collection.clone())
                        .or_default()
                        .push(key.clone());
                }
            }
        }
        for (collection, deleted) in deleted_by_collection {
            collections.enqueue_save(Some(&collection), deleted);
        }

        debug!(tx = %tx_id, "transaction committed");
        Ok(())
    }

    /// Roll back a transaction: discard staged values, release key locks,
    /// drop it from the registry. A rollback of an unknown (already
    /// terminal) transaction is a no-op.
    pub fn rollback(&self, tx_id: Uuid, collections: &CollectionManager) -> Result<()> {
        let tx = {
            let mut registry = self.registry.lock();
            match registry.get(&tx_id).map(|tx| tx.state) {
                None => return Ok(()),
                Some(TxState::Preparing) => {
                    return Err(EmberError::conflict(format!(
                        "transaction {} has a commit in flight",
                        tx_id
                    )));
                }
                Some(_) => registry.remove(&tx_id),
            }
        };

        if let Some(tx) = tx {
            let names: HashSet<&str> = tx.write_set.iter().map(|op| op.collection.as_str()).collect();
            for name in names {
                if let Some(store) = collections.get_existing(name) {
                    store.rollback_tx(tx_id);
                }
            }
            debug!(tx = %tx_id, "transaction rolled back");
        }
        Ok(())
    }

    /// Roll back every ACTIVE transaction older than `timeout`.
    ///
    /// Called by the abandoned-transaction GC loop. Returns the number of
    /// transactions collected.
    pub fn gc_abandoned(&self, timeout: Duration, collections: &CollectionManager) -> usize {
        let stale: Vec<Uuid> = {
            let registry = self.registry.lock();
            registry
                .values()
                .filter(|tx| tx.state == TxState::Active && tx.age() > timeout)
                .map(|tx| tx.id)
                .collect()
        };

        let mut collected = 0;
        for tx_id in stale {
            match self.rollback(tx_id, collections) {
                Ok(()) => {
                    warn!(tx = %tx_id, "rolled back abandoned transaction");
                    collected += 1;
                }
                Err(e) => warn!(tx = %tx_id, error = %e, "abandoned transaction GC skipped"),
            }
        }
        collected
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        TransactionManager::new()
    }
}

struct ResolvedOp {
    collection: String,
    shard: usize,
    write: StagedWrite,
}

fn abort_staging(stores: &HashMap<String, Arc<InMemStore>>, tx_id: Uuid) {
    for store in stores.values() {
        store.rollback_tx(tx_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_durability::DatabasePaths;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, CollectionManager, TransactionManager) {
        let dir = TempDir::new().unwrap();
        let collections = CollectionManager::new(DatabasePaths::new(dir.path()), 16).unwrap();
        (dir, collections, TransactionManager::new())
    }

    fn set_op(collection: &str, key: &str, value: serde_json::Value) -> WriteOp {
        WriteOp {
            collection: collection.into(),
            key: key.into(),
            value: serde_json::to_vec(&value).unwrap(),
            ttl_seconds: 0,
            kind: WriteKind::Set,
        }
    }

    #[test]
    fn test_commit_applies_all_ops() {
        let (_dir, collections, manager) = setup();
        let tx = manager.begin();
        manager
            .record_write(tx, set_op("people", "a", json!({"v": 1})))
            .unwrap();
        manager
            .record_write(tx, set_op("people", "b", json!({"v": 2})))
            .unwrap();
        manager.commit(tx, &collections, None).unwrap();

        let store = collections.get_existing("people").unwrap();
        assert!(store.get("a").is_some());
        assert!(store.get("b").is_some());
        assert!(!manager.contains(tx));
        collections.shutdown();
    }

    #[test]
    fn test_commit_enriches_timestamps() {
        let (_dir, collections, manager) = setup();
        let tx = manager.begin();
        manager
            .record_write(tx, set_op("people", "a", json!({"v": 1})))
            .unwrap();
        manager.commit(tx, &collections, None).unwrap();

        let store = collections.get_existing("people").unwrap();
        let doc = document::decode(&store.get("a").unwrap()).unwrap();
        assert!(doc.get("created_at").is_some());
        assert_eq!(doc["created_at"], doc["updated_at"]);
        collections.shutdown();
    }

    #[test]
    fn test_set_on_existing_key_conflicts_and_is_atomic() {
        let (_dir, collections, manager) = setup();
        let store = collections.get_collection("people");
        store.set(
            "a",
            serde_json::to_vec(&json!({"v": 0})).unwrap(),
            Duration::ZERO,
        );

        let tx = manager.begin();
        manager
            .record_write(tx, set_op("people", "fresh", json!({"v": 1})))
            .unwrap();
        manager
            .record_write(tx, set_op("people", "a", json!({"v": 2})))
            .unwrap();
        let err = manager.commit(tx, &collections, None).unwrap_err();
        assert!(err.is_conflict());

        // No partial effects
        assert!(store.get("fresh").is_none());
        let doc = document::decode(&store.get("a").unwrap()).unwrap();
        assert_eq!(doc["v"], 0);
        assert!(!manager.contains(tx));
        collections.shutdown();
    }

    #[test]
    fn test_update_missing_key_conflicts() {
        let (_dir, collections, manager) = setup();
        let tx = manager.begin();
        manager
            .record_write(
                tx,
                WriteOp {
                    collection: "people".into(),
                    key: "ghost".into(),
                    value: serde_json::to_vec(&json!({"v": 1})).unwrap(),
                    ttl_seconds: 0,
                    kind: WriteKind::Update,
                },
            )
            .unwrap();
        assert!(manager.commit(tx, &collections, None).unwrap_err().is_conflict());
        collections.shutdown();
    }

    #[test]
    fn test_update_merges_patch() {
        let (_dir, collections, manager) = setup();
        let store = collections.get_collection("people");
        store.set(
            "a",
            serde_json::to_vec(&json!({"x": 1, "y": 2})).unwrap(),
            Duration::ZERO,
        );

        let tx = manager.begin();
        manager
            .record_write(
                tx,
                WriteOp {
                    collection: "people".into(),
                    key: "a".into(),
                    value: serde_json::to_vec(&json!({"y": 9, "z": 3})).unwrap(),
                    ttl_seconds: 0,
                    kind: WriteKind::Update,
                },
            )
            .unwrap();
        manager.commit(tx, &collections, None).unwrap();

        let doc = document::decode(&store.get("a").unwrap()).unwrap();
        assert_eq!(doc["x"], 1);
        assert_eq!(doc["y"], 9);
        assert_eq!(doc["z"], 3);
        assert!(doc.get("updated_at").is_some());
        collections.shutdown();
    }

    #[test]
    fn test_locked_key_fails_other_commit() {
        let (_dir, collections, manager) = setup();
        let store = collections.get_collection("people");

        // A foreign transaction holds the key lock
        let foreign = Uuid::new_v4();
        let shard = store.shard_id("x");
        store.try_lock_keys(shard, foreign, &["x"]).unwrap();

        let tx = manager.begin();
        manager
            .record_write(tx, set_op("people", "x", json!({"v": 1})))
            .unwrap();
        let err = manager.commit(tx, &collections, None).unwrap_err();
        assert!(err.is_conflict());
        // The loser's lock attempt left nothing behind
        store.rollback_tx(foreign);
        assert!(!store.is_key_locked("x"));
        collections.shutdown();
    }

    #[test]
    fn test_key_locks_released_after_commit() {
        let (_dir, collections, manager) = setup();
        let tx = manager.begin();
        manager
            .record_write(tx, set_op("people", "a", json!({"v": 1})))
            .unwrap();
        manager.commit(tx, &collections, None).unwrap();

        let store = collections.get_existing("people").unwrap();
        assert!(!store.is_key_locked("a"));
        collections.shutdown();
    }

    #[test]
    fn test_rollback_discards_writes() {
        let (_dir, collections, manager) = setup();
        let tx = manager.begin();
        manager
            .record_write(tx, set_op("people", "a", json!({"v": 1})))
            .unwrap();
        manager.rollback(tx, &collections).unwrap();

        assert!(!manager.contains(tx));
        assert!(collections.get_collection("people").get("a").is_none());
        // Rollback of a terminal transaction is a no-op
        manager.rollback(tx, &collections).unwrap();
        collections.shutdown();
    }

    #[test]
    fn test_record_write_after_terminal_fails() {
        let (_dir, collections, manager) = setup();
        let tx = manager.begin();
        manager.rollback(tx, &collections).unwrap();
        assert!(manager
            .record_write(tx, set_op("people", "a", json!({})))
            .unwrap_err()
            .is_not_found());
        collections.shutdown();
    }

    #[test]
    fn test_empty_commit_succeeds() {
        let (_dir, collections, manager) = setup();
        let tx = manager.begin();
        manager.commit(tx, &collections, None).unwrap();
        assert!(!manager.contains(tx));
        collections.shutdown();
    }

    #[test]
    fn test_gc_rolls_back_stale_active() {
        let (_dir, collections, manager) = setup();
        let stale = manager.begin();
        manager
            .record_write(stale, set_op("people", "a", json!({"v": 1})))
            .unwrap();
        let fresh = manager.begin();

        let collected = manager.gc_abandoned(Duration::ZERO, &collections);
        assert_eq!(collected, 2);
        assert!(!manager.contains(stale));
        assert!(!manager.contains(fresh));

        // Nothing applied
        assert!(collections.get_collection("people").get("a").is_none());
        collections.shutdown();
    }

    #[test]
    fn test_gc_spares_young_transactions() {
        let (_dir, collections, manager) = setup();
        let tx = manager.begin();
        let collected = manager.gc_abandoned(Duration::from_secs(3600), &collections);
        assert_eq!(collected, 0);
        assert!(manager.contains(tx));
        collections.shutdown();
    }

    #[test]
    fn test_delete_of_cold_only_key_commits() {
        let (_dir, collections, manager) = setup();
        // Write a doc, persist it, then evict it from memory
        let store = collections.get_collection("people");
        store.set(
            "coldkey",
            serde_json::to_vec(
                &json!({"_id": "coldkey", "created_at": "2015-01-01T00:00:00.000000Z"}),
            )
            .unwrap(),
            Duration::ZERO,
        );
        collections.enqueue_save(Some("people"), Vec::new());
        collections.flush();
        store.evict_cold_data(Utc::now());
        assert!(store.get("coldkey").is_none());

        let tx = manager.begin();
        manager
            .record_write(
                tx,
                WriteOp {
                    collection: "people".into(),
                    key: "coldkey".into(),
                    value: Vec::new(),
                    ttl_seconds: 0,
                    kind: WriteKind::Delete,
                },
            )
            .unwrap();
        manager.commit(tx, &collections, None).unwrap();
        collections.flush();

        // The file record is now tombstoned
        let value = collections.cold_value("people", "coldkey").unwrap();
        assert!(value.is_none());
        collections.shutdown();
    }
}
