//! Property tests for the secondary index invariants.
//!
//! For any sequence of document writes and deletes:
//! - an equality lookup returns exactly the live keys holding that value
//! - an inclusive range lookup equals a naive filter over live documents
//! - no empty value nodes survive (checked via node counts after churn)

use ember_storage::{FieldIndex, IndexKey, IndexManager};
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashMap;

#[derive(Debug, Clone)]
enum Op {
    Set(u8, i32),
    Delete(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (any::<u8>(), -50i32..50).prop_map(|(k, v)| Op::Set(k, v)),
        any::<u8>().prop_map(Op::Delete),
    ]
}

proptest! {
    #[test]
    fn equality_lookup_matches_model(ops in proptest::collection::vec(op_strategy(), 1..100)) {
        let mgr = IndexManager::new();
        mgr.create_field("v");
        let mut model: HashMap<String, i32> = HashMap::new();

        for op in ops {
            match op {
                Op::Set(k, v) => {
                    let key = format!("k{}", k);
                    let old = model.insert(key.clone(), v).map(|o| json!({"v": o}));
                    let new = json!({"v": v});
                    mgr.reindex_document(&key, old.as_ref(), Some(&new));
                }
                Op::Delete(k) => {
                    let key = format!("k{}", k);
                    if let Some(old) = model.remove(&key) {
                        mgr.unindex_document(&key, &json!({"v": old}));
                    }
                }
            }
        }

        // Every value in the model is found exactly where it should be
        for (key, v) in &model {
            let hits = mgr.lookup("v", &json!(v)).unwrap();
            prop_assert!(hits.contains(key), "{} missing under {}", key, v);
        }
        for v in -50i32..50 {
            let hits = mgr.lookup("v", &json!(v)).unwrap();
            let expected: Vec<&String> = model
                .iter()
                .filter(|(_, mv)| **mv == v)
                .map(|(k, _)| k)
                .collect();
            prop_assert_eq!(hits.len(), expected.len());
        }
    }

    #[test]
    fn range_lookup_matches_naive_filter(
        values in proptest::collection::vec(-100i32..100, 1..60),
        lo in -100i32..100,
        span in 0i32..80,
    ) {
        let mut index = FieldIndex::new();
        for (i, v) in values.iter().enumerate() {
            index.insert(&IndexKey::Numeric(*v as f64), &format!("d{}", i));
        }

        let hi = lo.saturating_add(span);
        let hits = index
            .range(
                Some(&IndexKey::Numeric(lo as f64)),
                Some(&IndexKey::Numeric(hi as f64)),
                true,
                true,
            )
            .unwrap();

        let expected = values
            .iter()
            .filter(|v| **v >= lo && **v <= hi)
            .count();
        prop_assert_eq!(hits.len(), expected);
    }

    #[test]
    fn churn_leaves_no_empty_nodes(keys in proptest::collection::vec(any::<u8>(), 1..60)) {
        let mut index = FieldIndex::new();
        let value = IndexKey::Numeric(7.0);
        for k in &keys {
            index.insert(&value, &format!("k{}", k));
        }
        for k in &keys {
            index.remove(&value, &format!("k{}", k));
        }
        prop_assert!(index.is_empty());
        prop_assert_eq!(index.node_count(), 0);
    }
}
