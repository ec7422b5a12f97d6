//! Transactions: lifecycle state and the two-phase commit coordinator.

pub mod manager;
pub mod transaction;

pub use manager::TransactionManager;
pub use transaction::{Transaction, TxState};
