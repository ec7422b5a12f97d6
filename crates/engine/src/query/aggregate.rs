//! Grouping, aggregation, ordering, and pagination.

use crate::query::filter::{coerce_f64, compare_values, render_string, Filter};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Rendered group-key token for a missing field.
const NULL_KEY: &str = "NULL";

/// One key of a multi-key sort.
#[derive(Debug, Clone)]
pub struct OrderKey {
    /// Field to sort by
    pub field: String,
    /// Descending when true
    pub descending: bool,
}

/// Aggregation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    /// Row count (`count(*)`) or non-null count (`count(field)`)
    Count,
    /// Numeric sum
    Sum,
    /// Numeric mean
    Avg,
    /// Numeric minimum
    Min,
    /// Numeric maximum
    Max,
}

impl AggFunc {
    /// Parse the function name used in query JSON.
    pub fn parse(s: &str) -> Option<AggFunc> {
        match s.to_ascii_lowercase().as_str() {
            "count" => Some(AggFunc::Count),
            "sum" => Some(AggFunc::Sum),
            "avg" => Some(AggFunc::Avg),
            "min" => Some(AggFunc::Min),
            "max" => Some(AggFunc::Max),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            AggFunc::Count => "count",
            AggFunc::Sum => "sum",
            AggFunc::Avg => "avg",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
        }
    }
}

/// One requested aggregation.
#[derive(Debug, Clone)]
pub struct AggSpec {
    /// Function
    pub func: AggFunc,
    /// Source field; `*` is only meaningful for `count`
    pub field: String,
    /// Output key in the result row
    pub alias: String,
}

impl AggSpec {
    /// The default alias: `func(field)`.
    pub fn default_alias(func: AggFunc, field: &str) -> String {
        format!("{}({})", func.name(), field)
    }
}

/// Bucket documents by the composite group key and compute aggregations.
///
/// The group key is the `|`-joined rendering of the `group_by` fields, with
/// missing fields collapsed to `"NULL"`. With no `group_by`, all documents
/// form one group. `having` filters the aggregated rows.
pub fn aggregate(
    docs: &[Value],
    group_by: &[String],
    aggs: &[AggSpec],
    having: Option<&Filter>,
) -> Vec<Value> {
    // BTreeMap keeps group output deterministic
    let mut groups: BTreeMap<String, Vec<&Value>> = BTreeMap::new();
    for doc in docs {
        let key = group_key(doc, group_by);
        groups.entry(key).or_default().push(doc);
    }

    let mut rows = Vec::with_capacity(groups.len());
    for (_, members) in groups {
        let mut row = Map::new();

        for field in group_by {
            let value = members
                .first()
                .and_then(|doc| doc.get(field))
                .cloned()
                .unwrap_or(Value::Null);
            row.insert(field.clone(), value);
        }

        for agg in aggs {
            row.insert(agg.alias.clone(), compute(agg, &members));
        }

        let row = Value::Object(row);
        if having.map(|h| h.matches(&row)).unwrap_or(true) {
            rows.push(row);
        }
    }
    rows
}

fn group_key(doc: &Value, group_by: &[String]) -> String {
    group_by
        .iter()
        .map(|field| match doc.get(field) {
            Some(Value::Null) | None => NULL_KEY.to_string(),
            Some(v) => render_string(v),
        })
        .collect::<Vec<_>>()
        .join("|")
}

fn compute(agg: &AggSpec, members: &[&Value]) -> Value {
    match agg.func {
        AggFunc::Count => {
            if agg.field == "*" {
                json!(members.len())
            } else {
                let n = members
                    .iter()
                    .filter(|doc| matches!(doc.get(&agg.field), Some(v) if !v.is_null()))
                    .count();
                json!(n)
            }
        }
        AggFunc::Sum | AggFunc::Avg | AggFunc::Min | AggFunc::Max => {
            let nums: Vec<f64> = members
                .iter()
                .filter_map(|doc| doc.get(&agg.field))
                .filter_map(coerce_f64)
                .collect();
            if nums.is_empty() {
                return Value::Null;
            }
            let result = match agg.func {
                AggFunc::Sum => nums.iter().sum(),
                AggFunc::Avg => nums.iter().sum::<f64>() / nums.len() as f64,
                AggFunc::Min => nums.iter().copied().fold(f64::INFINITY, f64::min),
                AggFunc::Max => nums.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                AggFunc::Count => unreachable!(),
            };
            json!(result)
        }
    }
}

/// Stable multi-key sort. Missing fields sort first under ascending (and
/// correspondingly last under descending).
pub fn order_documents(docs: &mut [Value], keys: &[OrderKey]) {
    if keys.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for key in keys {
            let ord = match (a.get(&key.field), b.get(&key.field)) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => compare_values(x, y),
            };
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Clamp `offset` into `[0, len]` and truncate to `limit`.
pub fn paginate(mut docs: Vec<Value>, offset: usize, limit: Option<usize>) -> Vec<Value> {
    let offset = offset.min(docs.len());
    docs.drain(..offset);
    if let Some(limit) = limit {
        docs.truncate(limit);
    }
    docs
}
