//! Index planning.
//!
//! The planner walks the filter tree and decides which part the secondary
//! indexes can answer:
//!
//! - a leaf on an indexed field with an index-usable op (`=`, `in`, `<`,
//!   `<=`, `>`, `>=`, `between`) becomes an index lookup with no residual;
//! - `and` intersects the candidate sets of indexed children and pushes
//!   the rest into the residual filter;
//! - `or` unions candidates only if *every* child is indexed, otherwise
//!   the whole node falls back to a full scan;
//! - `not` (and anything else) is a full scan.

use crate::query::filter::{CmpOp, Filter};
use ember_storage::IndexManager;
use serde_json::Value;
use std::collections::HashSet;

/// The executor's access path for the hot store.
#[derive(Debug)]
pub enum Plan {
    /// Fetch these candidate keys, then apply the residual filter.
    Index {
        /// Candidate store keys from index lookups
        candidates: HashSet<String>,
        /// Filter part the index could not answer
        residual: Option<Filter>,
    },
    /// Scan everything and apply the full filter.
    FullScan,
}

/// Plan the hot pass for a filter.
pub fn plan(filter: Option<&Filter>, indexes: &IndexManager) -> Plan {
    match filter {
        None => Plan::FullScan,
        Some(f) => match plan_node(f, indexes) {
            Some((candidates, residual)) => Plan::Index {
                candidates,
                residual,
            },
            None => Plan::FullScan,
        },
    }
}

/// Returns `Some((candidates, residual))` when the node can use an index,
/// `None` when it needs a full scan.
fn plan_node(filter: &Filter, indexes: &IndexManager) -> Option<(HashSet<String>, Option<Filter>)> {
    match filter {
        Filter::Leaf { field, op, value } => {
            index_lookup(field, *op, value, indexes).map(|set| (set, None))
        }
        Filter::And(children) => {
            let mut candidate_sets: Vec<HashSet<String>> = Vec::new();
            let mut residual: Vec<Filter> = Vec::new();

            for child in children {
                match plan_node(child, indexes) {
                    Some((set, None)) => candidate_sets.push(set),
                    Some((set, Some(extra))) => {
                        candidate_sets.push(set);
                        residual.push(extra);
                    }
                    None => residual.push(child.clone()),
                }
            }

            if candidate_sets.is_empty() {
                return None;
            }

            let mut iter = candidate_sets.into_iter();
            let mut intersection = iter.next().unwrap_or_default();
            for set in iter {
                intersection.retain(|k| set.contains(k));
            }

            let residual = match residual.len() {
                0 => None,
                1 => Some(residual.into_iter().next().unwrap()),
                _ => Some(Filter::And(residual)),
            };
            Some((intersection, residual))
        }
        Filter::Or(children) => {
            let mut union: HashSet<String> = HashSet::new();
            for child in children {
                match plan_node(child, indexes) {
                    Some((set, None)) => union.extend(set),
                    // A child with a residual is not fully indexed; the
                    // union would over- or under-select, so bail out
                    _ => return None,
                }
            }
            Some((union, None))
        }
        Filter::Not(_) => None,
    }
}

fn index_lookup(
    field: &str,
    op: CmpOp,
    value: &Value,
    indexes: &IndexManager,
) -> Option<HashSet<String>> {
    if !indexes.has_field(field) {
        return None;
    }

    match op {
        CmpOp::Eq => indexes.lookup(field, value),
        CmpOp::In => {
            let arr = value.as_array()?;
            let mut union = HashSet::new();
            for candidate in arr {
                union.extend(indexes.lookup(field, candidate)?);
            }
            Some(union)
        }
        CmpOp::Lt => range(indexes, field, None, Some(value), true, false),
        CmpOp::Le => range(indexes, field, None, Some(value), true, true),
        CmpOp::Gt => range(indexes, field, Some(value), None, false, true),
        CmpOp::Ge => range(indexes, field, Some(value), None, true, true),
        CmpOp::Between => {
            let arr = value.as_array()?;
            if arr.len() != 2 {
                return None;
            }
            range(indexes, field, Some(&arr[0]), Some(&arr[1]), true, true)
        }
        _ => None,
    }
}

fn range(
    indexes: &IndexManager,
    field: &str,
    low: Option<&Value>,
    high: Option<&Value>,
    low_inclusive: bool,
    high_inclusive: bool,
) -> Option<HashSet<String>> {
    match indexes.range_lookup(field, low, high, low_inclusive, high_inclusive)? {
        Ok(set) => Some(set),
        // Mixed-type bounds: let the matcher handle it on a full scan
        Err(_) => None,
    }
}
