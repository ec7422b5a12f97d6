//! Stored item: an opaque value with creation time and per-item TTL.
//!
//! Items are the unit of storage inside a shard. The value is raw bytes;
//! normally a JSON document, but the engine stores non-JSON payloads
//! verbatim (they are simply never indexed).
//!
//! Expiry is evaluated lazily at read time; the periodic TTL sweep removes
//! expired entries in bulk.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// A single stored value with its creation timestamp and TTL.
///
/// A TTL of zero means the item never expires. Negative TTLs are normalized
/// to zero at the command boundary before an `Item` is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Raw value bytes (JSON for collection documents)
    pub value: Vec<u8>,
    /// Creation time; preserved across updates of the same key
    pub created_at: DateTime<Utc>,
    /// Time-to-live; `Duration::ZERO` means no expiry
    pub ttl: Duration,
}

impl Item {
    /// Create an item with an explicit creation time.
    pub fn new(value: Vec<u8>, created_at: DateTime<Utc>, ttl: Duration) -> Self {
        Item {
            value,
            created_at,
            ttl,
        }
    }

    /// Create an item stamped with the current time.
    pub fn now(value: Vec<u8>, ttl: Duration) -> Self {
        Item::new(value, Utc::now(), ttl)
    }

    /// Normalize a TTL expressed in seconds: negative values mean "no expiry".
    pub fn ttl_from_seconds(secs: i64) -> Duration {
        if secs <= 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(secs as u64)
        }
    }

    /// Check whether this item is expired at `now`.
    ///
    /// An item is live while `ttl == 0` or `now < created_at + ttl`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.ttl.is_zero() {
            return false;
        }
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => now >= self.created_at + ttl,
            // TTLs beyond chrono's representable range never expire in practice
            Err(_) => false,
        }
    }

    /// Check whether this item is live (not expired) at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now)
    }
}
