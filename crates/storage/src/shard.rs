//! A single hash partition of a store.
//!
//! Each shard owns its slice of the key space behind one `RwLock` (held by
//! the parent store). Besides the data map, a shard carries the two pieces
//! of transaction machinery the two-phase commit protocol needs:
//!
//! - `key_locks`: key → owning transaction id, populated only while that
//!   transaction is in its PREPARED window
//! - `staged`: per-transaction staged writes, invisible until published
//!
//! The transaction manager never touches these maps directly; it goes
//! through `try_lock_keys` / `stage` / `take_staged` / `release_tx` so the
//! shard can keep its invariants local.

use ember_core::Item;
use std::collections::HashMap;
use uuid::Uuid;

/// A write staged by a prepared transaction, applied on publish.
#[derive(Debug, Clone)]
pub enum StagedWrite {
    /// Insert or overwrite a key with a fully-enriched item.
    Put {
        /// Target key
        key: String,
        /// Item to store
        item: Item,
    },
    /// Remove a key.
    Delete {
        /// Target key
        key: String,
    },
}

impl StagedWrite {
    /// The key this write targets.
    pub fn key(&self) -> &str {
        match self {
            StagedWrite::Put { key, .. } => key,
            StagedWrite::Delete { key } => key,
        }
    }
}

/// One hash partition: data, transaction key locks, and staged writes.
#[derive(Debug, Default)]
pub struct Shard {
    /// Key → stored item
    pub(crate) data: HashMap<String, Item>,
    /// Key → transaction holding it in PREPARED state
    pub(crate) key_locks: HashMap<String, Uuid>,
    /// Transaction → staged writes awaiting publish
    pub(crate) staged: HashMap<Uuid, Vec<StagedWrite>>,
}

impl Shard {
    /// Create an empty shard.
    pub fn new() -> Self {
        Shard::default()
    }

    /// Number of keys in this shard.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the shard holds no data.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Atomically acquire key locks for a transaction.
    ///
    /// All-or-nothing: if any key is already locked by a different
    /// transaction, nothing is acquired and the holder's id is returned as
    /// the error. Re-acquiring keys already held by `tx` is a no-op.
    pub fn try_lock_keys(&mut self, tx: Uuid, keys: &[&str]) -> Result<(), Uuid> {
        for key in keys {
            if let Some(holder) = self.key_locks.get(*key) {
                if *holder != tx {
                    return Err(*holder);
                }
            }
        }
        for key in keys {
            self.key_locks.insert((*key).to_string(), tx);
        }
        Ok(())
    }

    /// Stage writes for a prepared transaction.
    pub fn stage(&mut self, tx: Uuid, writes: Vec<StagedWrite>) {
        self.staged.entry(tx).or_default().extend(writes);
    }

    /// Take the staged writes for a transaction, leaving its key locks in
    /// place (publish releases them per applied key).
    pub fn take_staged(&mut self, tx: Uuid) -> Vec<StagedWrite> {
        self.staged.remove(&tx).unwrap_or_default()
    }

    /// Release a single key lock if held by `tx`.
    pub fn unlock_key(&mut self, tx: Uuid, key: &str) {
        if self.key_locks.get(key) == Some(&tx) {
            self.key_locks.remove(key);
        }
    }

    /// Drop everything a transaction holds in this shard: staged writes and
    /// key locks. Used by rollback and by publish completion.
    pub fn release_tx(&mut self, tx: Uuid) {
        self.staged.remove(&tx);
        self.key_locks.retain(|_, holder| *holder != tx);
    }

    /// Whether any transaction currently holds a lock on `key`.
    pub fn is_locked(&self, key: &str) -> bool {
        self.key_locks.contains_key(key)
    }
}
