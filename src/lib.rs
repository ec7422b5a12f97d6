//! # EmberDB
//!
//! An in-process document database: a sharded in-memory store organized
//! into named collections, with per-field secondary indexes, multi-key
//! transactions backed by a write-ahead log, periodic checkpoints, and a
//! hot/cold layout where aged documents leave memory but stay queryable
//! from disk. Values are opaque JSON document payloads.
//!
//! # Quick start
//!
//! ```no_run
//! use emberdb::{Command, Database, EngineConfig, Identity};
//!
//! fn main() -> emberdb::Result<()> {
//!     let db = Database::open("./data", EngineConfig::default())?;
//!     let me = Identity::system();
//!
//!     db.execute(
//!         Command::CollectionItemSet {
//!             name: "people".into(),
//!             key: "p1".into(),
//!             value: br#"{"name":"Ada","age":36}"#.to_vec(),
//!             ttl_seconds: 0,
//!             tx: None,
//!         },
//!         &me,
//!     )?;
//!
//!     let result = db.execute(
//!         Command::CollectionQuery {
//!             name: "people".into(),
//!             query: serde_json::json!({
//!                 "filter": {"field": "age", "op": ">=", "value": 18}
//!             }),
//!         },
//!         &me,
//!     )?;
//!     println!("{result}");
//!
//!     db.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! The wire protocol, CLI, and authentication live outside this crate; the
//! engine consumes typed [`Command`] records and an [`Authorizer`]
//! callback. Internal crates (storage, durability) are implementation
//! detail; this facade is the stable surface.

pub use ember_core::{
    Action, AllowAll, Authorizer, Command, EmberError, EngineConfig, Identity, ItemPayload, Result,
    RootWrites, WalEntry, WriteKind, WriteOp,
};
pub use ember_engine::{Database, USERS_COLLECTION};
