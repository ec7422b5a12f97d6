//! Core types shared across the Ember engine.
//!
//! This crate holds the contract layer: the unified error type, typed
//! operation records (commands and WAL entries), the stored-item and
//! document models, engine configuration, and the authorization seam.
//! It has no storage or I/O logic of its own.

pub mod auth;
pub mod command;
pub mod config;
pub mod document;
pub mod error;
pub mod item;

pub use auth::{Action, AllowAll, Authorizer, Identity, RootWrites};
pub use command::{cmd_type, Command, ItemPayload, WalEntry, WriteKind, WriteOp};
pub use config::EngineConfig;
pub use error::{EmberError, Result};
pub use item::Item;
