//! Hot/cold tiering: periodic cold eviction and tombstone compaction.
//!
//! Eviction removes documents older than `now − cold_months` from memory
//! and indexes; the on-disk records stay and keep answering queries
//! through the cold pass. Each collection is saved before its eviction
//! pass so nothing leaves memory without a durable copy.
//!
//! Compaction rewrites each collection file dropping `_deleted: true`
//! records, under the collection's file lock so it serializes with the
//! async saver and the checkpointer.

use crate::collections::CollectionManager;
use chrono::{Months, Utc};
use ember_storage::collection_file;
use tracing::{debug, error, info};

/// One cold-eviction pass over every collection.
///
/// Returns the number of documents evicted from memory.
pub fn run_cold_eviction(collections: &CollectionManager, cold_months: u32) -> usize {
    if cold_months == 0 {
        return 0;
    }
    let Some(threshold) = Utc::now().checked_sub_months(Months::new(cold_months)) else {
        return 0;
    };

    let mut evicted = 0;
    for name in collections.collection_names() {
        // Persist before evicting so the cold copy is on disk
        if let Err(e) = collections.save_now(Some(&name)) {
            error!(collection = %name, error = %e, "pre-eviction save failed, skipping collection");
            continue;
        }
        if let Some(store) = collections.get_existing(&name) {
            let n = store.evict_cold_data(threshold);
            if n > 0 {
                debug!(collection = %name, evicted = n, "evicted cold documents");
            }
            evicted += n;
        }
    }
    if evicted > 0 {
        info!(evicted, "cold eviction pass complete");
    }
    evicted
}

/// One compaction pass over every collection file.
///
/// Returns the number of files rewritten.
pub fn run_compaction(collections: &CollectionManager) -> usize {
    let names = match collections.paths().existing_collections() {
        Ok(names) => names,
        Err(e) => {
            error!(error = %e, "compaction could not list collection files");
            return 0;
        }
    };

    let mut compacted = 0;
    for name in names {
        let guard = collections.file_lock(Some(&name));
        let _held = guard.lock();
        let path = collections.collection_path(&name);
        match collection_file::compact(&path) {
            Ok(kept) => {
                debug!(collection = %name, kept, "compacted collection file");
                compacted += 1;
            }
            Err(e) => error!(collection = %name, error = %e, "compaction failed"),
        }
    }
    compacted
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_durability::DatabasePaths;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_eviction_keeps_cold_queryable_on_disk() {
        let dir = TempDir::new().unwrap();
        let collections = CollectionManager::new(DatabasePaths::new(dir.path()), 16).unwrap();
        let store = collections.get_collection("people");

        store.set(
            "old",
            serde_json::to_vec(&json!({
                "_id": "old",
                "created_at": "2015-01-01T00:00:00.000000Z"
            }))
            .unwrap(),
            Duration::ZERO,
        );

        let evicted = run_cold_eviction(&collections, 12);
        assert_eq!(evicted, 1);
        assert!(store.get("old").is_none());
        assert!(collections.cold_key_exists("people", "old").unwrap());
        collections.shutdown();
    }

    #[test]
    fn test_eviction_disabled_when_zero_months() {
        let dir = TempDir::new().unwrap();
        let collections = CollectionManager::new(DatabasePaths::new(dir.path()), 16).unwrap();
        let store = collections.get_collection("people");
        store.set(
            "old",
            serde_json::to_vec(&json!({"created_at": "2015-01-01T00:00:00.000000Z"})).unwrap(),
            Duration::ZERO,
        );
        assert_eq!(run_cold_eviction(&collections, 0), 0);
        assert!(store.get("old").is_some());
        collections.shutdown();
    }

    #[test]
    fn test_compaction_drops_tombstones() {
        let dir = TempDir::new().unwrap();
        let paths = DatabasePaths::new(dir.path());
        let collections = CollectionManager::new(paths.clone(), 16).unwrap();

        let live = serde_json::to_vec(&json!({"_id": "a"})).unwrap();
        let dead = serde_json::to_vec(&json!({"_id": "b", "_deleted": true})).unwrap();
        collection_file::save(
            &paths.collection_file("people"),
            &[],
            vec![("a", live.as_slice()), ("b", dead.as_slice())],
        )
        .unwrap();

        assert_eq!(run_compaction(&collections), 1);

        let mut reader =
            collection_file::CollectionFileReader::open(&paths.collection_file("people")).unwrap();
        assert_eq!(reader.num_entries(), 1);
        let (key, _) = reader.next_record().unwrap().unwrap();
        assert_eq!(key, "a");
        collections.shutdown();
    }
}
