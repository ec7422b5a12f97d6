//! Global checkpoints.
//!
//! A checkpoint is a consistent snapshot of the whole engine: the main
//! store file plus every collection file, each written under its file lock.
//! Only when *both* phases succeed is the WAL rotated; the sealed segments
//! are then covered by the snapshot and purged. A crash mid-rotation
//! leaves the old segment intact; startup replay covers both segments in
//! order.

use crate::collections::CollectionManager;
use ember_core::Result;
use ember_durability::WalWriter;
use tracing::{debug, error, info};

/// Write a full checkpoint and rotate the WAL on success.
pub fn run_checkpoint(collections: &CollectionManager, wal: Option<&WalWriter>) -> Result<()> {
    // Phase 1: main store
    collections.save_now(None)?;

    // Phase 2: every collection
    for name in collections.collection_names() {
        collections.save_now(Some(&name))?;
    }

    // Both phases succeeded: rotate and drop covered segments
    if let Some(wal) = wal {
        let new_segment = wal.rotate()?;
        wal.purge_segments_before(new_segment)?;
    }

    debug!("checkpoint complete");
    Ok(())
}

/// Checkpoint tick for the periodic worker: failures are logged, never
/// propagated. The next tick retries.
pub fn checkpoint_tick(collections: &CollectionManager, wal: Option<&WalWriter>) {
    match run_checkpoint(collections, wal) {
        Ok(()) => info!("periodic checkpoint written"),
        Err(e) => error!(error = %e, "checkpoint failed; WAL not rotated"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_durability::{list_segments, DatabasePaths};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_checkpoint_writes_files_and_rotates() {
        let dir = TempDir::new().unwrap();
        let paths = DatabasePaths::new(dir.path());
        let collections = CollectionManager::new(paths.clone(), 16).unwrap();
        let wal = WalWriter::open(&paths.wal_dir()).unwrap();

        collections
            .main_store()
            .set("mk", b"mv".to_vec(), Duration::ZERO);
        let store = collections.get_collection("people");
        store.set(
            "d1",
            serde_json::to_vec(&json!({"v": 1})).unwrap(),
            Duration::ZERO,
        );
        wal.append(&ember_core::WalEntry::SetMain {
            key: "mk".into(),
            value: b"mv".to_vec(),
            ttl_seconds: 0,
        })
        .unwrap();

        run_checkpoint(&collections, Some(&wal)).unwrap();

        assert!(paths.main_store_file().exists());
        assert!(paths.collection_file("people").exists());
        // Old segment purged, fresh one active
        assert_eq!(list_segments(&paths.wal_dir()).unwrap(), vec![2]);
        collections.shutdown();
    }

    #[test]
    fn test_checkpoint_without_wal() {
        let dir = TempDir::new().unwrap();
        let collections = CollectionManager::new(DatabasePaths::new(dir.path()), 16).unwrap();
        collections
            .main_store()
            .set("k", b"v".to_vec(), Duration::ZERO);
        run_checkpoint(&collections, None).unwrap();
        collections.shutdown();
    }
}
