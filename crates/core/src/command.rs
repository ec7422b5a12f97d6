//! Typed operation records.
//!
//! The wire protocol, framing, and authentication all live outside the
//! engine; an external decoder turns network frames into [`Command`] values
//! and hands them to the engine facade. The same module defines the
//! [`WalEntry`] records the durability pipeline appends: a numeric command
//! type plus a JSON payload, so replay can re-dispatch deterministically.
//!
//! Payloads are JSON (the engine's native value format); the record framing
//! around them is binary and lives in `ember-durability`.

use crate::error::{EmberError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The kind of mutation a transactional write op performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteKind {
    /// Insert a new document; commit fails if the key exists
    Set,
    /// Patch an existing document; commit fails if the key is missing
    Update,
    /// Remove an existing document; commit fails if the key is missing
    Delete,
}

/// One operation in a transaction's write set.
///
/// For `Set` and `Update`, `value` holds the document payload (the patch,
/// for updates, until commit-time enrichment resolves it against the stored
/// document). For `Delete`, `value` is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteOp {
    /// Target collection
    pub collection: String,
    /// Target key within the collection
    pub key: String,
    /// Document payload bytes (JSON); empty for deletes
    pub value: Vec<u8>,
    /// Time-to-live in seconds for inserts; 0 or negative means immortal
    pub ttl_seconds: i64,
    /// What to do with the key
    pub kind: WriteKind,
}

/// A key/value pair carried by the `*Many` mutation commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemPayload {
    /// Item key
    pub key: String,
    /// Document payload bytes (JSON)
    pub value: Vec<u8>,
}

/// A typed operation record produced by the external command decoder.
///
/// Mutation commands on collections carry an optional `tx` field: when set,
/// the operation is recorded into that open transaction instead of being
/// applied immediately (immediate application is an implicit single-op
/// transaction).
#[derive(Debug, Clone)]
pub enum Command {
    /// Set a key in the main store. The value is opaque; non-JSON payloads
    /// are stored verbatim.
    Set {
        /// Store key
        key: String,
        /// Raw value bytes
        value: Vec<u8>,
        /// TTL in seconds; 0 or negative means immortal
        ttl_seconds: i64,
    },
    /// Create an empty collection (no-op if it exists).
    CollectionCreate {
        /// Collection name
        name: String,
    },
    /// Drop a collection and its file.
    CollectionDelete {
        /// Collection name
        name: String,
    },
    /// Create a secondary index on a field, backfilling from current data.
    CollectionIndexCreate {
        /// Collection name
        name: String,
        /// Indexed field
        field: String,
    },
    /// Drop a secondary index.
    CollectionIndexDelete {
        /// Collection name
        name: String,
        /// Indexed field
        field: String,
    },
    /// Insert a document into a collection.
    CollectionItemSet {
        /// Collection name
        name: String,
        /// Item key
        key: String,
        /// Document payload (JSON)
        value: Vec<u8>,
        /// TTL in seconds; 0 or negative means immortal
        ttl_seconds: i64,
        /// Open transaction to record into, if any
        tx: Option<Uuid>,
    },
    /// Insert many documents.
    CollectionItemSetMany {
        /// Collection name
        name: String,
        /// Items to insert
        items: Vec<ItemPayload>,
        /// Open transaction to record into, if any
        tx: Option<Uuid>,
    },
    /// Patch an existing document.
    CollectionItemUpdate {
        /// Collection name
        name: String,
        /// Item key
        key: String,
        /// JSON merge patch
        patch: Vec<u8>,
        /// Open transaction to record into, if any
        tx: Option<Uuid>,
    },
    /// Patch many existing documents.
    CollectionItemUpdateMany {
        /// Collection name
        name: String,
        /// Per-key patches
        patches: Vec<ItemPayload>,
        /// Open transaction to record into, if any
        tx: Option<Uuid>,
    },
    /// Delete a document.
    CollectionItemDelete {
        /// Collection name
        name: String,
        /// Item key
        key: String,
        /// Open transaction to record into, if any
        tx: Option<Uuid>,
    },
    /// Delete many documents.
    CollectionItemDeleteMany {
        /// Collection name
        name: String,
        /// Item keys
        keys: Vec<String>,
        /// Open transaction to record into, if any
        tx: Option<Uuid>,
    },
    /// Run a query against a collection.
    CollectionQuery {
        /// Collection name
        name: String,
        /// Query document (filter/order/aggregation grammar)
        query: Value,
    },
    /// Open a transaction.
    Begin,
    /// Commit an open transaction.
    Commit {
        /// Transaction to commit
        tx_id: Uuid,
    },
    /// Roll back an open transaction.
    Rollback {
        /// Transaction to roll back
        tx_id: Uuid,
    },
    /// Create a user in the system collection.
    UserCreate {
        /// Username (document `_id`)
        username: String,
        /// Plaintext password, hashed before storage
        password: String,
        /// Role name
        role: String,
    },
    /// Patch a user document.
    UserUpdate {
        /// Username
        username: String,
        /// JSON merge patch
        patch: Value,
    },
    /// Delete a user.
    UserDelete {
        /// Username
        username: String,
    },
    /// Change a user's password.
    UserChangePassword {
        /// Username
        username: String,
        /// New plaintext password, hashed before storage
        new_password: String,
    },
    /// Destructively replace all in-memory state from a backup directory.
    Restore {
        /// Backup name under the backup root
        backup_name: String,
    },
}

// ============================================================================
// WAL entries
// ============================================================================

/// Command type codes used in WAL record framing.
pub mod cmd_type {
    /// Main-store set
    pub const SET_MAIN: u16 = 0x0001;
    /// Collection creation
    pub const COLLECTION_CREATE: u16 = 0x0010;
    /// Collection deletion
    pub const COLLECTION_DELETE: u16 = 0x0011;
    /// Secondary index creation
    pub const INDEX_CREATE: u16 = 0x0012;
    /// Secondary index deletion
    pub const INDEX_DELETE: u16 = 0x0013;
    /// Committed transaction carrying its enriched write set
    pub const TXN_COMMIT: u16 = 0x0020;
}

/// A durable operation record appended to the WAL.
///
/// Exactly the committed operations appear here: one `TxnCommit` per
/// transaction (implicit or explicit) carrying the already-enriched write
/// set, plus the administrative commands that change engine structure.
/// Queries and in-flight transaction bookkeeping are never logged.
#[derive(Debug, Clone, PartialEq)]
pub enum WalEntry {
    /// Main-store set
    SetMain {
        /// Store key
        key: String,
        /// Raw value bytes
        value: Vec<u8>,
        /// TTL in seconds
        ttl_seconds: i64,
    },
    /// Collection creation
    CollectionCreate {
        /// Collection name
        name: String,
    },
    /// Collection deletion
    CollectionDelete {
        /// Collection name
        name: String,
    },
    /// Secondary index creation
    IndexCreate {
        /// Collection name
        collection: String,
        /// Indexed field
        field: String,
    },
    /// Secondary index deletion
    IndexDelete {
        /// Collection name
        collection: String,
        /// Indexed field
        field: String,
    },
    /// A committed transaction's enriched write set
    TxnCommit {
        /// Transaction id (for tracing; replay does not deduplicate)
        tx_id: Uuid,
        /// Enriched operations in commit order
        ops: Vec<WriteOp>,
    },
}

#[derive(Serialize, Deserialize)]
struct SetMainPayload {
    key: String,
    value: Vec<u8>,
    ttl_seconds: i64,
}

#[derive(Serialize, Deserialize)]
struct NamePayload {
    name: String,
}

#[derive(Serialize, Deserialize)]
struct IndexPayload {
    collection: String,
    field: String,
}

#[derive(Serialize, Deserialize)]
struct TxnCommitPayload {
    tx_id: Uuid,
    ops: Vec<WriteOp>,
}

impl WalEntry {
    /// The command type code used in the record frame.
    pub fn cmd_type(&self) -> u16 {
        match self {
            WalEntry::SetMain { .. } => cmd_type::SET_MAIN,
            WalEntry::CollectionCreate { .. } => cmd_type::COLLECTION_CREATE,
            WalEntry::CollectionDelete { .. } => cmd_type::COLLECTION_DELETE,
            WalEntry::IndexCreate { .. } => cmd_type::INDEX_CREATE,
            WalEntry::IndexDelete { .. } => cmd_type::INDEX_DELETE,
            WalEntry::TxnCommit { .. } => cmd_type::TXN_COMMIT,
        }
    }

    /// Serialize the payload (JSON).
    pub fn encode_payload(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            WalEntry::SetMain {
                key,
                value,
                ttl_seconds,
            } => serde_json::to_vec(&SetMainPayload {
                key: key.clone(),
                value: value.clone(),
                ttl_seconds: *ttl_seconds,
            }),
            WalEntry::CollectionCreate { name } | WalEntry::CollectionDelete { name } => {
                serde_json::to_vec(&NamePayload { name: name.clone() })
            }
            WalEntry::IndexCreate { collection, field }
            | WalEntry::IndexDelete { collection, field } => serde_json::to_vec(&IndexPayload {
                collection: collection.clone(),
                field: field.clone(),
            }),
            WalEntry::TxnCommit { tx_id, ops } => serde_json::to_vec(&TxnCommitPayload {
                tx_id: *tx_id,
                ops: ops.clone(),
            }),
        };
        bytes.map_err(|e| EmberError::internal(format!("WAL payload encode failed: {}", e)))
    }

    /// Decode a payload given its command type code.
    ///
    /// # Errors
    ///
    /// `Corruption` for an unrecognized code or an undecodable payload.
    pub fn decode(code: u16, payload: &[u8]) -> Result<Self> {
        fn parse<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Result<T> {
            serde_json::from_slice(payload)
                .map_err(|e| EmberError::corruption(format!("WAL payload decode failed: {}", e)))
        }

        match code {
            cmd_type::SET_MAIN => {
                let p: SetMainPayload = parse(payload)?;
                Ok(WalEntry::SetMain {
                    key: p.key,
                    value: p.value,
                    ttl_seconds: p.ttl_seconds,
                })
            }
            cmd_type::COLLECTION_CREATE => {
                let p: NamePayload = parse(payload)?;
                Ok(WalEntry::CollectionCreate { name: p.name })
            }
            cmd_type::COLLECTION_DELETE => {
                let p: NamePayload = parse(payload)?;
                Ok(WalEntry::CollectionDelete { name: p.name })
            }
            cmd_type::INDEX_CREATE => {
                let p: IndexPayload = parse(payload)?;
                Ok(WalEntry::IndexCreate {
                    collection: p.collection,
                    field: p.field,
                })
            }
            cmd_type::INDEX_DELETE => {
                let p: IndexPayload = parse(payload)?;
                Ok(WalEntry::IndexDelete {
                    collection: p.collection,
                    field: p.field,
                })
            }
            cmd_type::TXN_COMMIT => {
                let p: TxnCommitPayload = parse(payload)?;
                Ok(WalEntry::TxnCommit {
                    tx_id: p.tx_id,
                    ops: p.ops,
                })
            }
            other => Err(EmberError::corruption(format!(
                "unrecognized WAL command type: {:#06x}",
                other
            ))),
        }
    }
}
