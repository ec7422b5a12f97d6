//! End-to-end scenarios through the facade: basic set/get, TTL expiry,
//! and index-assisted range queries.

use emberdb::{Command, Database, EngineConfig, Identity};
use serde_json::json;
use tempfile::TempDir;

fn open(dir: &TempDir) -> Database {
    Database::open(dir.path(), EngineConfig::default()).unwrap()
}

#[test]
fn basic_set_get() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    let me = Identity::system();

    db.execute(
        Command::Set {
            key: "u:1".into(),
            value: br#"{"n":"A"}"#.to_vec(),
            ttl_seconds: 0,
        },
        &me,
    )
    .unwrap();

    let main = db.collections().main_store();
    assert_eq!(main.get("u:1"), Some(br#"{"n":"A"}"#.to_vec()));
    assert_eq!(main.get("u:2"), None);
    db.shutdown();
}

#[test]
fn ttl_expiry() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    let me = Identity::system();

    db.execute(
        Command::Set {
            key: "k".into(),
            value: br#"{"x":1}"#.to_vec(),
            ttl_seconds: 1,
        },
        &me,
    )
    .unwrap();
    assert!(db.collections().main_store().get("k").is_some());

    std::thread::sleep(std::time::Duration::from_millis(1_500));

    let main = db.collections().main_store();
    assert_eq!(main.get("k"), None);
    assert!(main.get_all().iter().all(|(key, _)| key != "k"));
    db.shutdown();
}

#[test]
fn index_range_query() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    let me = Identity::system();

    db.execute(
        Command::CollectionCreate {
            name: "people".into(),
        },
        &me,
    )
    .unwrap();
    db.execute(
        Command::CollectionIndexCreate {
            name: "people".into(),
            field: "age".into(),
        },
        &me,
    )
    .unwrap();

    for age in 1..=10 {
        db.execute(
            Command::CollectionItemSet {
                name: "people".into(),
                key: format!("p{}", age),
                value: serde_json::to_vec(&json!({"_id": format!("p{}", age), "age": age}))
                    .unwrap(),
                ttl_seconds: 0,
                tx: None,
            },
            &me,
        )
        .unwrap();
    }

    let result = db
        .execute(
            Command::CollectionQuery {
                name: "people".into(),
                query: json!({
                    "filter": {"field": "age", "op": "between", "value": [3, 7]}
                }),
            },
            &me,
        )
        .unwrap();
    let docs = result.as_array().unwrap();
    assert_eq!(docs.len(), 5);
    for doc in docs {
        let age = doc["age"].as_i64().unwrap();
        assert!((3..=7).contains(&age));
    }

    let result = db
        .execute(
            Command::CollectionQuery {
                name: "people".into(),
                query: json!({
                    "filter": {"field": "age", "op": "between", "value": [3, 7]},
                    "order_by": [{"field": "age", "direction": "desc"}],
                    "limit": 2
                }),
            },
            &me,
        )
        .unwrap();
    let docs = result.as_array().unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0]["age"], 7);
    assert_eq!(docs[1]["age"], 6);
    db.shutdown();
}

#[test]
fn query_shapes() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    let me = Identity::system();

    for (key, city, age) in [("a", "oslo", 30), ("b", "oslo", 40), ("c", "bergen", 20)] {
        db.execute(
            Command::CollectionItemSet {
                name: "people".into(),
                key: key.into(),
                value: serde_json::to_vec(&json!({"_id": key, "city": city, "age": age}))
                    .unwrap(),
                ttl_seconds: 0,
                tx: None,
            },
            &me,
        )
        .unwrap();
    }

    let count = db
        .execute(
            Command::CollectionQuery {
                name: "people".into(),
                query: json!({"count": true}),
            },
            &me,
        )
        .unwrap();
    assert_eq!(count, json!({"count": 3}));

    let distinct = db
        .execute(
            Command::CollectionQuery {
                name: "people".into(),
                query: json!({"distinct": "city"}),
            },
            &me,
        )
        .unwrap();
    assert_eq!(distinct, json!(["bergen", "oslo"]));

    let grouped = db
        .execute(
            Command::CollectionQuery {
                name: "people".into(),
                query: json!({
                    "group_by": ["city"],
                    "aggregations": [{"func": "sum", "field": "age", "alias": "total"}],
                    "order_by": [{"field": "city", "direction": "asc"}]
                }),
            },
            &me,
        )
        .unwrap();
    let rows = grouped.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["city"], "bergen");
    assert_eq!(rows[0]["total"], 20.0);
    assert_eq!(rows[1]["total"], 70.0);
    db.shutdown();
}
