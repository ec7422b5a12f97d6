//! Query execution: hot pass, cold pass, merge, and result shaping.
//!
//! 1. **Hot pass**: the planner picks index candidates (or everything);
//!    values come back through `get_many`, decode as JSON, and the residual
//!    filter runs over them. Matches land in a map keyed by `_id` (falling
//!    back to the store key), so cold duplicates can be skipped.
//! 2. **Cold pass**: a streaming scan of the collection file with the full
//!    original filter, skipping tombstones and anything the hot side
//!    already answered. The scan reads its own file handle lock-free; a
//!    concurrent compaction renames a new file into place and this reader
//!    simply finishes on the old inode.
//! 3. **Merge** (hot wins), then distinct / count / aggregation / ordering
//!    / pagination shape the reply.

use crate::query::aggregate::{self, AggFunc, AggSpec, OrderKey};
use crate::query::filter::{compare_values, Filter};
use crate::query::plan::{plan, Plan};
use ember_core::{document, EmberError, Result};
use ember_storage::collection_file::CollectionFileReader;
use ember_storage::InMemStore;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;

/// A parsed query document.
#[derive(Debug, Default)]
pub struct QuerySpec {
    /// Filter tree, if any
    pub filter: Option<Filter>,
    /// Multi-key sort
    pub order_by: Vec<OrderKey>,
    /// Maximum rows returned
    pub limit: Option<usize>,
    /// Rows skipped before the limit
    pub offset: usize,
    /// Return only a count object
    pub count: bool,
    /// Project unique non-null values of this field
    pub distinct: Option<String>,
    /// Grouping fields
    pub group_by: Vec<String>,
    /// Requested aggregations
    pub aggregations: Vec<AggSpec>,
    /// Filter over aggregated rows
    pub having: Option<Filter>,
}

impl QuerySpec {
    /// Parse a query from its JSON form.
    pub fn parse(query: &Value) -> Result<QuerySpec> {
        let obj = query
            .as_object()
            .ok_or_else(|| EmberError::bad_request("query must be a JSON object"))?;

        let filter = match obj.get("filter") {
            Some(Value::Null) | None => None,
            Some(f) => Some(Filter::parse(f)?),
        };

        let order_by = match obj.get("order_by") {
            Some(Value::Array(keys)) => keys
                .iter()
                .map(|k| {
                    let field = k
                        .get("field")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            EmberError::bad_request("order_by entry requires a 'field' string")
                        })?
                        .to_string();
                    let descending = match k.get("direction").and_then(Value::as_str) {
                        None | Some("asc") => false,
                        Some("desc") => true,
                        Some(other) => {
                            return Err(EmberError::bad_request(format!(
                                "order_by direction must be 'asc' or 'desc', got '{}'",
                                other
                            )))
                        }
                    };
                    Ok(OrderKey { field, descending })
                })
                .collect::<Result<Vec<_>>>()?,
            Some(_) => return Err(EmberError::bad_request("order_by must be an array")),
            None => Vec::new(),
        };

        let limit = match obj.get("limit") {
            Some(v) => Some(
                v.as_u64()
                    .ok_or_else(|| EmberError::bad_request("limit must be a non-negative integer"))?
                    as usize,
            ),
            None => None,
        };
        let offset = match obj.get("offset") {
            Some(v) => v
                .as_u64()
                .ok_or_else(|| EmberError::bad_request("offset must be a non-negative integer"))?
                as usize,
            None => 0,
        };

        let aggregations = match obj.get("aggregations") {
            Some(Value::Array(specs)) => specs
                .iter()
                .map(|spec| {
                    let func = spec
                        .get("func")
                        .and_then(Value::as_str)
                        .and_then(AggFunc::parse)
                        .ok_or_else(|| {
                            EmberError::bad_request(
                                "aggregation requires func in count|sum|avg|min|max",
                            )
                        })?;
                    let field = spec
                        .get("field")
                        .and_then(Value::as_str)
                        .unwrap_or("*")
                        .to_string();
                    let alias = spec
                        .get("alias")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| AggSpec::default_alias(func, &field));
                    Ok(AggSpec { func, field, alias })
                })
                .collect::<Result<Vec<_>>>()?,
            Some(_) => return Err(EmberError::bad_request("aggregations must be an array")),
            None => Vec::new(),
        };

        let group_by = match obj.get("group_by") {
            Some(Value::Array(fields)) => fields
                .iter()
                .map(|f| {
                    f.as_str().map(str::to_string).ok_or_else(|| {
                        EmberError::bad_request("group_by entries must be strings")
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            Some(Value::String(field)) => vec![field.clone()],
            Some(_) => return Err(EmberError::bad_request("group_by must be an array")),
            None => Vec::new(),
        };

        let having = match obj.get("having") {
            Some(Value::Null) | None => None,
            Some(h) => Some(Filter::parse(h)?),
        };

        Ok(QuerySpec {
            filter,
            order_by,
            limit,
            offset,
            count: obj.get("count").and_then(Value::as_bool).unwrap_or(false),
            distinct: obj
                .get("distinct")
                .and_then(Value::as_str)
                .map(str::to_string),
            group_by,
            aggregations,
            having,
        })
    }
}

/// Run a query against one collection: its hot store and (when present) its
/// cold file.
pub fn execute(spec: &QuerySpec, store: &InMemStore, cold_path: Option<&Path>) -> Result<Value> {
    // Hot pass
    let mut hot: HashMap<String, Value> = HashMap::new();
    match plan(spec.filter.as_ref(), store.indexes()) {
        Plan::Index {
            candidates,
            residual,
        } => {
            let values = store.get_many(candidates.iter());
            for (key, bytes) in values {
                let Some(doc) = document::decode(&bytes) else {
                    continue;
                };
                if document::is_tombstone(&doc) {
                    continue;
                }
                if residual.as_ref().map(|f| f.matches(&doc)).unwrap_or(true) {
                    hot.insert(document::doc_id(&doc, &key), doc);
                }
            }
        }
        Plan::FullScan => {
            for (key, item) in store.get_all() {
                let Some(doc) = document::decode(&item.value) else {
                    continue;
                };
                if document::is_tombstone(&doc) {
                    continue;
                }
                if spec.filter.as_ref().map(|f| f.matches(&doc)).unwrap_or(true) {
                    hot.insert(document::doc_id(&doc, &key), doc);
                }
            }
        }
    }

    // Cold pass: full original filter, tombstone-aware, hot wins
    let mut cold: Vec<Value> = Vec::new();
    if let Some(path) = cold_path {
        if path.exists() {
            let mut reader = CollectionFileReader::open(path)?;
            while let Some((key, bytes)) = reader.next_record()? {
                let Some(doc) = document::decode(&bytes) else {
                    continue;
                };
                if document::is_tombstone(&doc) {
                    continue;
                }
                let id = document::doc_id(&doc, &key);
                if hot.contains_key(&id) || store.contains(&key) {
                    continue;
                }
                if spec.filter.as_ref().map(|f| f.matches(&doc)).unwrap_or(true) {
                    cold.push(doc);
                }
            }
        }
    }

    // Merge
    let mut docs: Vec<Value> = hot.into_values().collect();
    docs.extend(cold);

    // Result shaping
    if let Some(field) = &spec.distinct {
        return Ok(distinct_values(&docs, field));
    }

    if spec.count && spec.aggregations.is_empty() && spec.group_by.is_empty() {
        return Ok(json!({ "count": docs.len() }));
    }

    if !spec.aggregations.is_empty() || !spec.group_by.is_empty() {
        let mut rows = aggregate::aggregate(
            &docs,
            &spec.group_by,
            &spec.aggregations,
            spec.having.as_ref(),
        );
        aggregate::order_documents(&mut rows, &spec.order_by);
        let rows = aggregate::paginate(rows, spec.offset, spec.limit);
        return Ok(Value::Array(rows));
    }

    aggregate::order_documents(&mut docs, &spec.order_by);
    let docs = aggregate::paginate(docs, spec.offset, spec.limit);
    Ok(Value::Array(docs))
}

fn distinct_values(docs: &[Value], field: &str) -> Value {
    let mut seen: Vec<Value> = Vec::new();
    for doc in docs {
        let Some(value) = doc.get(field) else { continue };
        if value.is_null() {
            continue;
        }
        if !seen.iter().any(|v| v == value) {
            seen.push(value.clone());
        }
    }
    seen.sort_by(|a, b| compare_values(a, b));
    Value::Array(seen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn store_with_people() -> InMemStore {
        let store = InMemStore::new(16);
        store.create_index("age");
        for (i, age) in (1..=10).enumerate() {
            let doc = json!({"_id": format!("d{}", age), "age": age, "idx": i});
            store.set(
                &format!("d{}", age),
                serde_json::to_vec(&doc).unwrap(),
                Duration::ZERO,
            );
        }
        store
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(QuerySpec::parse(&json!("nope")).is_err());
        assert!(QuerySpec::parse(&json!({"limit": "x"})).is_err());
        assert!(QuerySpec::parse(&json!({"order_by": [{"direction": "desc"}]})).is_err());
        assert!(QuerySpec::parse(&json!({"order_by": [{"field": "a", "direction": "sideways"}]}))
            .is_err());
        assert!(QuerySpec::parse(&json!({"aggregations": [{"func": "median"}]})).is_err());
    }

    #[test]
    fn test_between_query_with_order_and_limit() {
        let store = store_with_people();
        let spec = QuerySpec::parse(&json!({
            "filter": {"field": "age", "op": "between", "value": [3, 7]},
            "order_by": [{"field": "age", "direction": "desc"}],
            "limit": 2
        }))
        .unwrap();

        let result = execute(&spec, &store, None).unwrap();
        let docs = result.as_array().unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["age"], 7);
        assert_eq!(docs[1]["age"], 6);
    }

    #[test]
    fn test_no_filter_returns_everything() {
        let store = store_with_people();
        let spec = QuerySpec::parse(&json!({})).unwrap();
        let result = execute(&spec, &store, None).unwrap();
        assert_eq!(result.as_array().unwrap().len(), 10);
    }

    #[test]
    fn test_count_shape() {
        let store = store_with_people();
        let spec = QuerySpec::parse(&json!({
            "filter": {"field": "age", "op": ">", "value": 8},
            "count": true
        }))
        .unwrap();
        let result = execute(&spec, &store, None).unwrap();
        assert_eq!(result, json!({"count": 2}));
    }

    #[test]
    fn test_distinct_shape() {
        let store = InMemStore::new(16);
        for (key, city) in [("a", "oslo"), ("b", "oslo"), ("c", "bergen")] {
            store.set(
                key,
                serde_json::to_vec(&json!({"city": city})).unwrap(),
                Duration::ZERO,
            );
        }
        store.set(
            "d",
            serde_json::to_vec(&json!({"other": 1})).unwrap(),
            Duration::ZERO,
        );

        let spec = QuerySpec::parse(&json!({"distinct": "city"})).unwrap();
        let result = execute(&spec, &store, None).unwrap();
        assert_eq!(result, json!(["bergen", "oslo"]));
    }

    #[test]
    fn test_aggregation_flow() {
        let store = InMemStore::new(16);
        for (key, city, age) in [
            ("a", "oslo", 30),
            ("b", "oslo", 40),
            ("c", "bergen", 20),
        ] {
            store.set(
                key,
                serde_json::to_vec(&json!({"city": city, "age": age})).unwrap(),
                Duration::ZERO,
            );
        }
        let spec = QuerySpec::parse(&json!({
            "group_by": ["city"],
            "aggregations": [
                {"func": "count", "field": "*"},
                {"func": "avg", "field": "age", "alias": "mean_age"}
            ],
            "order_by": [{"field": "city", "direction": "asc"}]
        }))
        .unwrap();

        let result = execute(&spec, &store, None).unwrap();
        let rows = result.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["city"], "bergen");
        assert_eq!(rows[0]["count(*)"], 1);
        assert_eq!(rows[1]["mean_age"], 35.0);
    }

    #[test]
    fn test_offset_clamped() {
        let store = store_with_people();
        let spec = QuerySpec::parse(&json!({"offset": 1000})).unwrap();
        let result = execute(&spec, &store, None).unwrap();
        assert!(result.as_array().unwrap().is_empty());
    }

    #[test]
    fn test_cold_merge_hot_wins() {
        use ember_storage::collection_file;
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("people.col");

        // Cold file: d1 (stale copy), d2 (cold only), d3 (tombstoned)
        let stale = serde_json::to_vec(&json!({"_id": "d1", "v": "stale"})).unwrap();
        let cold_only = serde_json::to_vec(&json!({"_id": "d2", "v": "cold"})).unwrap();
        let dead = serde_json::to_vec(&json!({"_id": "d3", "_deleted": true})).unwrap();
        collection_file::save(
            &path,
            &[],
            vec![
                ("d1", stale.as_slice()),
                ("d2", cold_only.as_slice()),
                ("d3", dead.as_slice()),
            ],
        )
        .unwrap();

        let store = InMemStore::new(16);
        store.set(
            "d1",
            serde_json::to_vec(&json!({"_id": "d1", "v": "hot"})).unwrap(),
            Duration::ZERO,
        );

        let spec = QuerySpec::parse(&json!({})).unwrap();
        let result = execute(&spec, &store, Some(&path)).unwrap();
        let docs = result.as_array().unwrap();
        assert_eq!(docs.len(), 2);

        let d1 = docs.iter().find(|d| d["_id"] == "d1").unwrap();
        assert_eq!(d1["v"], "hot");
        assert!(docs.iter().any(|d| d["_id"] == "d2"));
        assert!(!docs.iter().any(|d| d["_id"] == "d3"));
    }
}
