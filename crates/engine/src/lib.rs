//! The Ember engine: collection management, transactions, queries,
//! durability policy, tiering, and the `Database` facade.
//!
//! External collaborators (wire protocol, CLI, auth mechanisms) hand the
//! facade typed [`Command`](ember_core::Command) values; everything from
//! authorization callbacks to WAL replay happens behind it.

pub mod background;
pub mod checkpoint;
pub mod collections;
pub mod database;
pub mod query;
pub mod replay;
pub mod tiering;
pub mod txn;
pub mod users;

pub use background::PeriodicWorker;
pub use collections::{validate_collection_name, CollectionManager, USERS_COLLECTION};
pub use database::Database;
pub use query::{execute as execute_query, Filter, QuerySpec};
pub use txn::{TransactionManager, TxState};
