//! Reserved document fields and timestamp enrichment.
//!
//! Documents are JSON objects. Four keys are reserved and engine-managed:
//!
//! - `_id`: string identifier, unique within a collection
//! - `created_at`: RFC3339 UTC string, set on first insert
//! - `updated_at`: RFC3339 UTC string, set on every mutation
//! - `_deleted`: tombstone flag; tombstoned documents stay in the
//!   collection file until compaction but are invisible to queries
//!
//! Values that fail to parse as JSON objects are stored verbatim and skip
//! enrichment and indexing entirely.

use crate::error::{EmberError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Reserved key: document identifier.
pub const FIELD_ID: &str = "_id";
/// Reserved key: creation timestamp (RFC3339 UTC).
pub const FIELD_CREATED_AT: &str = "created_at";
/// Reserved key: last-update timestamp (RFC3339 UTC).
pub const FIELD_UPDATED_AT: &str = "updated_at";
/// Reserved key: tombstone flag.
pub const FIELD_DELETED: &str = "_deleted";

/// Render a timestamp the way documents carry them.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a document-carried timestamp.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Try to decode raw value bytes as a JSON document.
///
/// Returns `None` for non-JSON payloads; those are stored verbatim and
/// never indexed or enriched.
pub fn decode(bytes: &[u8]) -> Option<Value> {
    serde_json::from_slice(bytes).ok()
}

/// The document identifier: `_id` when present and a string, otherwise the
/// store key the caller supplied.
pub fn doc_id(doc: &Value, fallback_key: &str) -> String {
    doc.get(FIELD_ID)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| fallback_key.to_owned())
}

/// Check the tombstone flag.
pub fn is_tombstone(doc: &Value) -> bool {
    doc.get(FIELD_DELETED).and_then(Value::as_bool) == Some(true)
}

/// The document's `created_at`, when present and parseable.
pub fn created_at(doc: &Value) -> Option<DateTime<Utc>> {
    doc.get(FIELD_CREATED_AT)
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
}

/// Stamp engine-managed timestamps onto a document payload.
///
/// Sets `updated_at` to `now` unconditionally; sets `created_at` to `now`
/// only when `is_new` is true (updates retain the original creation time
/// already present in the document).
///
/// # Errors
///
/// Returns `BadRequest` when the payload is not a JSON object; enrichment
/// is only defined for documents.
pub fn enrich(bytes: &[u8], now: DateTime<Utc>, is_new: bool) -> Result<Vec<u8>> {
    let mut doc: Value = serde_json::from_slice(bytes)?;
    let obj = doc
        .as_object_mut()
        .ok_or_else(|| EmberError::bad_request("document payload must be a JSON object"))?;

    let stamp = Value::String(format_timestamp(now));
    obj.insert(FIELD_UPDATED_AT.to_owned(), stamp.clone());
    if is_new {
        obj.insert(FIELD_CREATED_AT.to_owned(), stamp);
    }

    serde_json::to_vec(&doc).map_err(|e| EmberError::internal(format!("re-marshal failed: {}", e)))
}

/// Apply a JSON merge patch onto an existing document.
///
/// Top-level fields of `patch` overwrite the corresponding fields of
/// `base`; `_id` is never overwritten.
pub fn merge_patch(base: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
    let mut doc: Value = serde_json::from_slice(base)
        .map_err(|e| EmberError::corruption(format!("stored document is not JSON: {}", e)))?;
    let patch: Value = serde_json::from_slice(patch)?;

    let obj = doc
        .as_object_mut()
        .ok_or_else(|| EmberError::corruption("stored document is not a JSON object"))?;
    let patch_obj = patch
        .as_object()
        .ok_or_else(|| EmberError::bad_request("patch must be a JSON object"))?;

    for (k, v) in patch_obj {
        if k == FIELD_ID {
            continue;
        }
        obj.insert(k.clone(), v.clone());
    }

    serde_json::to_vec(&doc).map_err(|e| EmberError::internal(format!("re-marshal failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_enrich_new_document() {
        let now = Utc::now();
        let out = enrich(br#"{"n":"A"}"#, now, true).unwrap();
        let doc: Value = serde_json::from_slice(&out).unwrap();

        assert_eq!(doc["n"], "A");
        assert_eq!(doc[FIELD_CREATED_AT], doc[FIELD_UPDATED_AT]);
        assert!(parse_timestamp(doc[FIELD_CREATED_AT].as_str().unwrap()).is_some());
    }

    #[test]
    fn test_enrich_update_preserves_created_at() {
        let created = "2020-01-01T00:00:00.000000Z";
        let payload = format!(r#"{{"n":"A","created_at":"{}"}}"#, created);
        let out = enrich(payload.as_bytes(), Utc::now(), false).unwrap();
        let doc: Value = serde_json::from_slice(&out).unwrap();

        assert_eq!(doc[FIELD_CREATED_AT], created);
        assert_ne!(doc[FIELD_UPDATED_AT], created);
    }

    #[test]
    fn test_enrich_rejects_non_object() {
        assert!(enrich(b"[1,2,3]", Utc::now(), true).is_err());
        assert!(enrich(b"not json", Utc::now(), true).is_err());
    }

    #[test]
    fn test_doc_id_fallback() {
        let with_id = json!({"_id": "d1"});
        let without = json!({"x": 1});
        assert_eq!(doc_id(&with_id, "k"), "d1");
        assert_eq!(doc_id(&without, "k"), "k");
    }

    #[test]
    fn test_tombstone_flag() {
        assert!(is_tombstone(&json!({"_deleted": true})));
        assert!(!is_tombstone(&json!({"_deleted": false})));
        assert!(!is_tombstone(&json!({"x": 1})));
    }

    #[test]
    fn test_merge_patch_keeps_id() {
        let base = br#"{"_id":"d1","a":1,"b":2}"#;
        let patch = br#"{"_id":"other","b":3,"c":4}"#;
        let out = merge_patch(base, patch).unwrap();
        let doc: Value = serde_json::from_slice(&out).unwrap();

        assert_eq!(doc["_id"], "d1");
        assert_eq!(doc["a"], 1);
        assert_eq!(doc["b"], 3);
        assert_eq!(doc["c"], 4);
    }

    #[test]
    fn test_timestamp_round_trip() {
        let now = Utc::now();
        let rendered = format_timestamp(now);
        let parsed = parse_timestamp(&rendered).unwrap();
        // Rendering truncates to microseconds
        assert!((now - parsed).num_microseconds().unwrap_or(0).abs() < 2);
    }
}
