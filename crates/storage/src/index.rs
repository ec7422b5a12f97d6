//! Per-field secondary indexes.
//!
//! Each indexed field owns a pair of ordered trees: one keyed by `f64` for
//! values that coerce to a number (integers, floats, numeric strings), one
//! keyed by string for everything else that renders as text. Each tree node
//! maps a distinct value to the non-empty set of keys currently holding it.
//!
//! Invariants:
//! - a key appears in at most one node per tree per field
//! - a node with an empty key set is removed immediately
//! - on update, the old value's node loses the key before the new value's
//!   node gains it

use ember_core::{EmberError, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Ordered wrapper for `f64` tree keys.
///
/// NaN is rejected at classification time, so `total_cmp` gives a proper
/// total order over the values that reach the tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericKey(pub f64);

impl Eq for NumericKey {}

impl PartialOrd for NumericKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NumericKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// A value as it enters an index: numeric or textual.
///
/// Classification decides which tree a value lives in; equality and range
/// lookups use the same classification, so a query value always probes the
/// tree its type selects.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexKey {
    /// Values that coerce to a finite `f64`
    Numeric(f64),
    /// Everything else, by string rendering
    Text(String),
}

impl IndexKey {
    /// Classify a JSON value for indexing.
    ///
    /// Numbers and numeric strings go to the numeric tree; other strings
    /// and booleans go to the text tree. Nulls, objects, and arrays are not
    /// indexable and return `None`.
    pub fn classify(value: &Value) -> Option<IndexKey> {
        match value {
            Value::Number(n) => n.as_f64().filter(|f| f.is_finite()).map(IndexKey::Numeric),
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(f) if f.is_finite() && !s.trim().is_empty() => Some(IndexKey::Numeric(f)),
                _ => Some(IndexKey::Text(s.clone())),
            },
            Value::Bool(b) => Some(IndexKey::Text(b.to_string())),
            _ => None,
        }
    }
}

/// The B-tree pair for one indexed field.
#[derive(Debug, Default)]
pub struct FieldIndex {
    numeric: BTreeMap<NumericKey, HashSet<String>>,
    text: BTreeMap<String, HashSet<String>>,
}

impl FieldIndex {
    /// Create an empty field index.
    pub fn new() -> Self {
        FieldIndex::default()
    }

    /// Add `id` under `value`.
    pub fn insert(&mut self, value: &IndexKey, id: &str) {
        match value {
            IndexKey::Numeric(n) => {
                self.numeric
                    .entry(NumericKey(*n))
                    .or_default()
                    .insert(id.to_string());
            }
            IndexKey::Text(s) => {
                self.text
                    .entry(s.clone())
                    .or_default()
                    .insert(id.to_string());
            }
        }
    }

    /// Remove `id` from under `value`, dropping the node if it empties.
    pub fn remove(&mut self, value: &IndexKey, id: &str) {
        match value {
            IndexKey::Numeric(n) => {
                let k = NumericKey(*n);
                if let Some(ids) = self.numeric.get_mut(&k) {
                    ids.remove(id);
                    if ids.is_empty() {
                        self.numeric.remove(&k);
                    }
                }
            }
            IndexKey::Text(s) => {
                if let Some(ids) = self.text.get_mut(s) {
                    ids.remove(id);
                    if ids.is_empty() {
                        self.text.remove(s);
                    }
                }
            }
        }
    }

    /// Equality lookup: the set of ids holding exactly `value`.
    pub fn lookup(&self, value: &IndexKey) -> HashSet<String> {
        match value {
            IndexKey::Numeric(n) => self
                .numeric
                .get(&NumericKey(*n))
                .cloned()
                .unwrap_or_default(),
            IndexKey::Text(s) => self.text.get(s).cloned().unwrap_or_default(),
        }
    }

    /// Range lookup over one tree, selected by whichever bound is supplied.
    ///
    /// Iterates ascending from `low` (or the tree minimum when unbounded)
    /// while within the upper bound, unioning node sets. An exclusive lower
    /// bound subtracts the ids found exactly at `low`.
    ///
    /// # Errors
    ///
    /// `BadRequest` when the two bounds classify to different trees; mixed
    /// numeric/string ranges are not defined.
    pub fn range(
        &self,
        low: Option<&IndexKey>,
        high: Option<&IndexKey>,
        low_inclusive: bool,
        high_inclusive: bool,
    ) -> Result<HashSet<String>> {
        match (low, high) {
            (Some(IndexKey::Numeric(_)), Some(IndexKey::Text(_)))
            | (Some(IndexKey::Text(_)), Some(IndexKey::Numeric(_))) => Err(
                EmberError::bad_request("range bounds mix numeric and string values"),
            ),
            (Some(IndexKey::Numeric(lo)), high) => {
                let hi = match high {
                    Some(IndexKey::Numeric(h)) => Some(*h),
                    None => None,
                    _ => unreachable!("mixed bounds rejected above"),
                };
                Ok(Self::collect_range(
                    &self.numeric,
                    Some(NumericKey(*lo)),
                    hi.map(NumericKey),
                    low_inclusive,
                    high_inclusive,
                ))
            }
            (None, Some(IndexKey::Numeric(hi))) => Ok(Self::collect_range(
                &self.numeric,
                None,
                Some(NumericKey(*hi)),
                true,
                high_inclusive,
            )),
            (Some(IndexKey::Text(lo)), high) => {
                let hi = match high {
                    Some(IndexKey::Text(h)) => Some(h.clone()),
                    None => None,
                    _ => unreachable!("mixed bounds rejected above"),
                };
                Ok(Self::collect_range(
                    &self.text,
                    Some(lo.clone()),
                    hi,
                    low_inclusive,
                    high_inclusive,
                ))
            }
            (None, Some(IndexKey::Text(hi))) => Ok(Self::collect_range(
                &self.text,
                None,
                Some(hi.clone()),
                true,
                high_inclusive,
            )),
            (None, None) => {
                let mut all: HashSet<String> = HashSet::new();
                for ids in self.numeric.values().chain(self.text.values()) {
                    all.extend(ids.iter().cloned());
                }
                Ok(all)
            }
        }
    }

    fn collect_range<K: Ord + Clone>(
        tree: &BTreeMap<K, HashSet<String>>,
        low: Option<K>,
        high: Option<K>,
        low_inclusive: bool,
        high_inclusive: bool,
    ) -> HashSet<String> {
        use std::ops::Bound;

        let lower = match (&low, low_inclusive) {
            (Some(l), true) => Bound::Included(l.clone()),
            (Some(l), false) => Bound::Excluded(l.clone()),
            (None, _) => Bound::Unbounded,
        };
        let upper = match (&high, high_inclusive) {
            (Some(h), true) => Bound::Included(h.clone()),
            (Some(h), false) => Bound::Excluded(h.clone()),
            (None, _) => Bound::Unbounded,
        };

        let mut out = HashSet::new();
        for (_, ids) in tree.range((lower, upper)) {
            out.extend(ids.iter().cloned());
        }
        out
    }

    /// Check if both trees are empty.
    pub fn is_empty(&self) -> bool {
        self.numeric.is_empty() && self.text.is_empty()
    }

    /// Number of distinct values across both trees.
    pub fn node_count(&self) -> usize {
        self.numeric.len() + self.text.len()
    }
}

/// All secondary indexes of one store, keyed by field name.
///
/// Held under its own lock so index maintenance composes with shard
/// mutations without sharing guards across components.
#[derive(Debug, Default)]
pub struct IndexManager {
    fields: RwLock<HashMap<String, FieldIndex>>,
}

impl IndexManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        IndexManager::default()
    }

    /// Register a field for indexing. Existing data is backfilled by the
    /// caller via `index_document`.
    pub fn create_field(&self, field: &str) {
        self.fields
            .write()
            .entry(field.to_string())
            .or_insert_with(FieldIndex::new);
    }

    /// Drop a field's index entirely.
    pub fn drop_field(&self, field: &str) -> bool {
        self.fields.write().remove(field).is_some()
    }

    /// Drop every field index.
    pub fn clear(&self) {
        self.fields.write().clear();
    }

    /// Whether a field is indexed.
    pub fn has_field(&self, field: &str) -> bool {
        self.fields.read().contains_key(field)
    }

    /// Names of all indexed fields, sorted for deterministic file headers.
    pub fn field_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.fields.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Index a document's values for `id` across all registered fields.
    pub fn index_document(&self, id: &str, doc: &Value) {
        let mut fields = self.fields.write();
        for (field, index) in fields.iter_mut() {
            if let Some(key) = doc.get(field).and_then(IndexKey::classify) {
                index.insert(&key, id);
            }
        }
    }

    /// Remove a document's values for `id` across all registered fields.
    pub fn unindex_document(&self, id: &str, doc: &Value) {
        let mut fields = self.fields.write();
        for (field, index) in fields.iter_mut() {
            if let Some(key) = doc.get(field).and_then(IndexKey::classify) {
                index.remove(&key, id);
            }
        }
    }

    /// Index one field's value for `id`. Used for backfills when an index
    /// is created over existing data.
    pub fn index_field_value(&self, field: &str, id: &str, value: &Value) {
        let mut fields = self.fields.write();
        if let Some(index) = fields.get_mut(field) {
            if let Some(key) = IndexKey::classify(value) {
                index.insert(&key, id);
            }
        }
    }

    /// Apply an update diff: for each indexed field, move `id` from the old
    /// value's node to the new value's node, skipping unchanged fields.
    pub fn reindex_document(&self, id: &str, old: Option<&Value>, new: Option<&Value>) {
        let mut fields = self.fields.write();
        for (field, index) in fields.iter_mut() {
            let old_key = old.and_then(|d| d.get(field)).and_then(IndexKey::classify);
            let new_key = new.and_then(|d| d.get(field)).and_then(IndexKey::classify);

            if old_key == new_key {
                continue;
            }
            if let Some(k) = &old_key {
                index.remove(k, id);
            }
            if let Some(k) = &new_key {
                index.insert(k, id);
            }
        }
    }

    /// Equality lookup. `None` when the field is not indexed.
    pub fn lookup(&self, field: &str, value: &Value) -> Option<HashSet<String>> {
        let fields = self.fields.read();
        let index = fields.get(field)?;
        match IndexKey::classify(value) {
            Some(key) => Some(index.lookup(&key)),
            None => Some(HashSet::new()),
        }
    }

    /// Range lookup. `None` when the field is not indexed.
    pub fn range_lookup(
        &self,
        field: &str,
        low: Option<&Value>,
        high: Option<&Value>,
        low_inclusive: bool,
        high_inclusive: bool,
    ) -> Option<Result<HashSet<String>>> {
        let fields = self.fields.read();
        let index = fields.get(field)?;
        let low_key = low.and_then(IndexKey::classify);
        let high_key = high.and_then(IndexKey::classify);
        Some(index.range(
            low_key.as_ref(),
            high_key.as_ref(),
            low_inclusive,
            high_inclusive,
        ))
    }
}
