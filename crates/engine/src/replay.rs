//! WAL replay.
//!
//! On startup, entries recovered from the WAL are re-applied over the
//! loaded snapshot state. Replay runs as a fully privileged internal
//! caller: no authorization checks and, crucially, no re-entry into the
//! WAL (the entries being applied are already durable).
//!
//! Handlers are last-write-wins upserts, so replaying a prefix twice (a
//! crash between checkpoint rotation and segment purge) converges to the
//! same state: values in `TxnCommit` records were enriched at commit time
//! and apply as absolute writes.

use crate::collections::CollectionManager;
use ember_core::{Item, Result, WalEntry, WriteKind};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Re-apply recovered WAL entries in order.
///
/// Returns the number of entries applied. Touched collections get an async
/// save enqueued at the end so the files catch up with replayed state.
pub fn replay(collections: &CollectionManager, entries: Vec<WalEntry>) -> Result<usize> {
    let mut applied = 0;
    // Deleted keys per collection, so the saver can tombstone file records
    let mut deleted: HashMap<String, Vec<String>> = HashMap::new();
    let mut touched_main = false;

    for entry in entries {
        match entry {
            WalEntry::SetMain {
                key,
                value,
                ttl_seconds,
            } => {
                collections
                    .main_store()
                    .set(&key, value, Item::ttl_from_seconds(ttl_seconds));
                touched_main = true;
            }
            WalEntry::CollectionCreate { name } => {
                collections.get_collection(&name);
            }
            WalEntry::CollectionDelete { name } => {
                if let Err(e) = collections.delete_collection(&name) {
                    // Deleting a collection that never made it to disk is
                    // fine on a second replay
                    if !e.is_not_found() {
                        return Err(e);
                    }
                }
                deleted.remove(&name);
            }
            WalEntry::IndexCreate { collection, field } => {
                collections.get_collection(&collection).create_index(&field);
            }
            WalEntry::IndexDelete { collection, field } => {
                collections.get_collection(&collection).drop_index(&field);
            }
            WalEntry::TxnCommit { tx_id, ops } => {
                debug!(tx = %tx_id, ops = ops.len(), "replaying committed transaction");
                for op in ops {
                    let store = collections.get_collection(&op.collection);
                    match op.kind {
                        WriteKind::Set | WriteKind::Update => {
                            store.set(&op.key, op.value, Item::ttl_from_seconds(op.ttl_seconds));
                        }
                        WriteKind::Delete => {
                            if !store.delete(&op.key) {
                                // Cold-only or doubly-replayed delete; the
                                // tombstone below still lands in the file
                                warn!(
                                    collection = %op.collection,
                                    key = %op.key,
                                    "replayed delete had no in-memory target"
                                );
                            }
                            deleted
                                .entry(op.collection.clone())
                                .or_default()
                                .push(op.key.clone());
                        }
                    }
                    deleted.entry(op.collection).or_default();
                }
            }
        }
        applied += 1;
    }

    if touched_main {
        collections.enqueue_save(None, Vec::new());
    }
    for (collection, keys) in deleted {
        collections.enqueue_save(Some(&collection), keys);
    }

    if applied > 0 {
        info!(applied, "WAL replay complete");
    }
    Ok(applied)
}
