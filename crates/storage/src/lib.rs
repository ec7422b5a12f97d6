//! Storage layer: shards, the sharded store, secondary indexes, and the
//! collection file codec.
//!
//! Everything here is synchronous and lock-scoped; background scheduling,
//! transactions, and durability policy live in `ember-engine`.

pub mod collection_file;
pub mod index;
pub mod shard;
pub mod store;

pub use collection_file::{CollectionFileReader, RewriteAction};
pub use index::{FieldIndex, IndexKey, IndexManager, NumericKey};
pub use shard::{Shard, StagedWrite};
pub use store::{fnv1a_64, InMemStore};
