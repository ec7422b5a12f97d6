//! Transaction state.
//!
//! A transaction is a UUID, a lifecycle state, and an ordered write set.
//! It is created by `begin`, mutated only through `record_write`, `commit`,
//! and `rollback`, and removed from the manager once terminal.
//!
//! ```text
//!   ACTIVE ──commit()──▶ PREPARING ──shards prepared──▶ COMMITTED
//!     │                      │                             │
//!     │                      └──any failure──▶ ABORTED     └─publish─▶ (removed)
//!     └──rollback()──▶ ABORTED ──▶ (removed)
//! ```

use ember_core::WriteOp;
use std::time::Instant;
use uuid::Uuid;

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Accepting writes
    Active,
    /// Commit in flight: validation, locking, staging, WAL
    Preparing,
    /// Durable; publish in flight
    Committed,
    /// Rolled back
    Aborted,
}

/// An in-flight transaction.
#[derive(Debug)]
pub struct Transaction {
    /// Transaction id
    pub id: Uuid,
    /// Lifecycle state
    pub state: TxState,
    /// Ordered write set, drained at commit
    pub write_set: Vec<WriteOp>,
    /// Creation instant, used by abandoned-transaction GC
    pub started_at: Instant,
}

impl Transaction {
    /// Create a fresh ACTIVE transaction.
    pub fn new() -> Self {
        Transaction {
            id: Uuid::new_v4(),
            state: TxState::Active,
            write_set: Vec::new(),
            started_at: Instant::now(),
        }
    }

    /// Seconds since the transaction began.
    pub fn age(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Transaction::new()
    }
}
