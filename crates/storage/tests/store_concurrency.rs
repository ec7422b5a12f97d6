//! Concurrency tests for the sharded store.
//!
//! Verifies that shard independence holds under parallel writers, that the
//! key-lock table stays consistent across contended transactions, and that
//! index maintenance keeps up with concurrent mutation.

use ember_storage::{InMemStore, StagedWrite};
use ember_core::Item;
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

#[test]
fn concurrent_writers_disjoint_keys() {
    let store = Arc::new(InMemStore::new(16));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..200 {
                    let key = format!("t{}:k{}", t, i);
                    store.set(&key, format!("v{}", i).into_bytes(), Duration::ZERO);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(store.len(), 1600);
    assert_eq!(store.get("t3:k42"), Some(b"v42".to_vec()));
}

#[test]
fn concurrent_lock_contention_single_winner() {
    let store = Arc::new(InMemStore::new(16));
    let key = "contested";
    let shard = store.shard_id(key);

    let winners: Vec<bool> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let tx = Uuid::new_v4();
                store.try_lock_keys(shard, tx, &[key]).is_ok()
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect();

    assert_eq!(winners.iter().filter(|w| **w).count(), 1);
}

#[test]
fn staged_writes_invisible_until_publish() {
    let store = Arc::new(InMemStore::new(16));
    store.create_index("n");

    let tx = Uuid::new_v4();
    let keys = ["a", "b", "c"];
    for key in keys {
        let shard = store.shard_id(key);
        store.try_lock_keys(shard, tx, &[key]).unwrap();
        store.stage(
            shard,
            tx,
            vec![StagedWrite::Put {
                key: key.to_string(),
                item: Item::now(
                    serde_json::to_vec(&json!({"n": key})).unwrap(),
                    Duration::ZERO,
                ),
            }],
        );
    }

    // Readers in other threads see nothing while staged
    let reader_store = Arc::clone(&store);
    let observed = thread::spawn(move || keys.iter().filter_map(|k| reader_store.get(k)).count())
        .join()
        .unwrap();
    assert_eq!(observed, 0);

    for key in keys {
        store.publish(store.shard_id(key), tx);
    }

    for key in keys {
        assert!(store.get(key).is_some());
        assert!(!store.is_key_locked(key));
        assert!(store
            .indexes()
            .lookup("n", &json!(key))
            .unwrap()
            .contains(key));
    }
}

#[test]
fn ttl_sweep_under_concurrent_reads() {
    let store = Arc::new(InMemStore::new(16));
    for i in 0..100 {
        let item = Item::new(
            b"x".to_vec(),
            chrono::Utc::now() - chrono::Duration::seconds(5),
            Duration::from_secs(1),
        );
        store.set_item(&format!("dead{}", i), item);
        store.set(&format!("live{}", i), b"y".to_vec(), Duration::ZERO);
    }

    let reader = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 0..100 {
                // Expired entries are invisible whether or not the sweep ran
                assert!(store.get(&format!("dead{}", i)).is_none());
            }
        })
    };

    assert!(store.clean_expired_items());
    reader.join().unwrap();
    assert_eq!(store.len(), 100);
}
