//! Filter grammar: parsing, matching, and comparison semantics.
//!
//! Filters arrive as JSON and parse into a tagged tree:
//!
//! ```text
//! {"field": "age", "op": ">=", "value": 21}
//! {"and": [f1, f2, ...]}
//! {"or":  [f1, f2, ...]}
//! {"not": f}
//! ```
//!
//! Two values compare numerically iff both coerce to `f64` (numbers and
//! numeric strings); otherwise lexicographically on their string
//! rendering. A missing field matches only `is null`.

use ember_core::{EmberError, Result};
use regex::RegexBuilder;
use serde_json::Value;
use std::cmp::Ordering;

/// Comparison operator in a filter leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// SQL-style `like` with `%` wildcards, case-insensitive
    Like,
    /// Membership in an array of values
    In,
    /// Inclusive range, value is `[low, high]`
    Between,
    /// Field absent or null
    IsNull,
    /// Field present and non-null
    IsNotNull,
}

impl CmpOp {
    /// Parse the operator spelling used in query JSON.
    pub fn parse(s: &str) -> Result<CmpOp> {
        match s.to_ascii_lowercase().as_str() {
            "=" | "==" => Ok(CmpOp::Eq),
            "!=" | "<>" => Ok(CmpOp::Ne),
            "<" => Ok(CmpOp::Lt),
            "<=" => Ok(CmpOp::Le),
            ">" => Ok(CmpOp::Gt),
            ">=" => Ok(CmpOp::Ge),
            "like" => Ok(CmpOp::Like),
            "in" => Ok(CmpOp::In),
            "between" => Ok(CmpOp::Between),
            "is null" => Ok(CmpOp::IsNull),
            "is not null" => Ok(CmpOp::IsNotNull),
            other => Err(EmberError::bad_request(format!(
                "unknown filter operator '{}'",
                other
            ))),
        }
    }
}

/// A parsed filter tree.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Comparison on one field
    Leaf {
        /// Field name (top-level document key)
        field: String,
        /// Operator
        op: CmpOp,
        /// Comparison value (array for `in`/`between`)
        value: Value,
    },
    /// Every child matches
    And(Vec<Filter>),
    /// At least one child matches
    Or(Vec<Filter>),
    /// Child does not match
    Not(Box<Filter>),
}

impl Filter {
    /// Parse a filter from its JSON form.
    pub fn parse(value: &Value) -> Result<Filter> {
        let obj = value
            .as_object()
            .ok_or_else(|| EmberError::bad_request("filter must be a JSON object"))?;

        if let Some(children) = obj.get("and") {
            return Ok(Filter::And(Self::parse_children(children, "and")?));
        }
        if let Some(children) = obj.get("or") {
            return Ok(Filter::Or(Self::parse_children(children, "or")?));
        }
        if let Some(child) = obj.get("not") {
            return Ok(Filter::Not(Box::new(Filter::parse(child)?)));
        }

        let field = obj
            .get("field")
            .and_then(Value::as_str)
            .ok_or_else(|| EmberError::bad_request("filter leaf requires a 'field' string"))?;
        let op = obj
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| EmberError::bad_request("filter leaf requires an 'op' string"))?;
        let op = CmpOp::parse(op)?;
        let value = obj.get("value").cloned().unwrap_or(Value::Null);

        match op {
            CmpOp::In if !value.is_array() => {
                Err(EmberError::bad_request("'in' requires an array value"))
            }
            CmpOp::Between
                if value.as_array().map(|a| a.len()) != Some(2) =>
            {
                Err(EmberError::bad_request(
                    "'between' requires a [low, high] value",
                ))
            }
            CmpOp::Like if !value.is_string() => {
                Err(EmberError::bad_request("'like' requires a string pattern"))
            }
            _ => Ok(Filter::Leaf {
                field: field.to_string(),
                op,
                value,
            }),
        }
    }

    fn parse_children(value: &Value, node: &str) -> Result<Vec<Filter>> {
        let arr = value.as_array().ok_or_else(|| {
            EmberError::bad_request(format!("'{}' requires an array of filters", node))
        })?;
        if arr.is_empty() {
            return Err(EmberError::bad_request(format!(
                "'{}' requires at least one child filter",
                node
            )));
        }
        arr.iter().map(Filter::parse).collect()
    }

    /// Evaluate the filter against a document.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::And(children) => children.iter().all(|f| f.matches(doc)),
            Filter::Or(children) => children.iter().any(|f| f.matches(doc)),
            Filter::Not(child) => !child.matches(doc),
            Filter::Leaf { field, op, value } => {
                let field_value = doc.get(field);
                match op {
                    CmpOp::IsNull => matches!(field_value, None | Some(Value::Null)),
                    CmpOp::IsNotNull => {
                        !matches!(field_value, None | Some(Value::Null))
                    }
                    _ => {
                        let Some(actual) = field_value else {
                            return false;
                        };
                        if actual.is_null() {
                            return false;
                        }
                        match op {
                            CmpOp::Eq => compare_values(actual, value) == Ordering::Equal,
                            CmpOp::Ne => compare_values(actual, value) != Ordering::Equal,
                            CmpOp::Lt => compare_values(actual, value) == Ordering::Less,
                            CmpOp::Le => compare_values(actual, value) != Ordering::Greater,
                            CmpOp::Gt => compare_values(actual, value) == Ordering::Greater,
                            CmpOp::Ge => compare_values(actual, value) != Ordering::Less,
                            CmpOp::Like => match value.as_str() {
                                Some(pattern) => like_matches(pattern, &render_string(actual)),
                                None => false,
                            },
                            CmpOp::In => value
                                .as_array()
                                .map(|arr| {
                                    arr.iter().any(|candidate| {
                                        compare_values(actual, candidate) == Ordering::Equal
                                    })
                                })
                                .unwrap_or(false),
                            CmpOp::Between => value
                                .as_array()
                                .filter(|arr| arr.len() == 2)
                                .map(|arr| {
                                    compare_values(actual, &arr[0]) != Ordering::Less
                                        && compare_values(actual, &arr[1]) != Ordering::Greater
                                })
                                .unwrap_or(false),
                            CmpOp::IsNull | CmpOp::IsNotNull => unreachable!(),
                        }
                    }
                }
            }
        }
    }
}

/// Coerce a JSON value to `f64`: numbers directly, strings that parse.
pub fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok().filter(|f| f.is_finite())
        }
        _ => None,
    }
}

/// Render a value the way comparisons and group keys see it: bare strings
/// for strings, JSON text for everything else.
pub fn render_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Compare two values: numerically iff both coerce to `f64`, otherwise
/// lexicographically on their string rendering.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (coerce_f64(a), coerce_f64(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => render_string(a).cmp(&render_string(b)),
    }
}

/// SQL-style `like`: `%` is the wildcard, matching is case-insensitive and
/// anchored. Regex metacharacters in the pattern are literal.
pub fn like_matches(pattern: &str, text: &str) -> bool {
    let regex_pattern = format!("^{}$", regex::escape(pattern).replace('%', ".*"));
    RegexBuilder::new(&regex_pattern)
        .case_insensitive(true)
        .build()
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}
