//! Authorization seam.
//!
//! Authentication lives outside the engine; requests arrive with a resolved
//! [`Identity`]. The engine consults an [`Authorizer`] callback before every
//! mutation and query. WAL replay bypasses the callback entirely (replayed
//! operations were already authorized when first committed).

/// A resolved caller identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Username as authenticated by the external layer
    pub username: String,
    /// Whether this identity has unrestricted access
    pub is_root: bool,
}

impl Identity {
    /// The internal identity used by replay and background workers.
    pub fn system() -> Self {
        Identity {
            username: "_system".to_string(),
            is_root: true,
        }
    }
}

/// What a command is asking to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Read a key or run a query
    Read,
    /// Mutate data (set/update/delete, transactions)
    Write,
    /// Structural or administrative change (collections, indexes, users, restore)
    Admin,
}

/// Permission callback consulted before each operation.
pub trait Authorizer: Send + Sync {
    /// Decide whether `identity` may perform `action`, optionally scoped to
    /// a collection.
    fn allow(&self, identity: &Identity, action: Action, collection: Option<&str>) -> bool;
}

/// Permits everything. Used for embedded deployments and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn allow(&self, _identity: &Identity, _action: Action, _collection: Option<&str>) -> bool {
        true
    }
}

/// Root-only writes: anyone reads, root identities mutate.
///
/// A reasonable default for servers that resolve identities externally but
/// have not wired a policy engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct RootWrites;

impl Authorizer for RootWrites {
    fn allow(&self, identity: &Identity, action: Action, _collection: Option<&str>) -> bool {
        match action {
            Action::Read => true,
            Action::Write | Action::Admin => identity.is_root,
        }
    }
}
