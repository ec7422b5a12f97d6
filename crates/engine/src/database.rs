//! The engine facade.
//!
//! `Database` wires the collection manager, transaction manager, WAL, and
//! background workers together behind a single `execute(Command, &Identity)`
//! entry point. The wire protocol, connection handling, and authentication
//! live outside; this type consumes typed commands and an authorization
//! callback.
//!
//! # Startup
//!
//! 1. Load the main store and every collection file (documents older than
//!    the cold threshold stay on disk).
//! 2. Replay the WAL over the loaded state, privileged and without
//!    re-logging.
//! 3. Seed the root/admin users if absent.
//! 4. Spawn the background workers: TTL sweep, checkpointer, cold
//!    eviction, compaction, and transaction GC.
//!
//! # Shutdown
//!
//! Stop and join the maintenance workers, flush the async save queue, stop
//! the transaction GC, write a final checkpoint, sync and close the WAL.

use crate::background::PeriodicWorker;
use crate::checkpoint;
use crate::collections::{validate_collection_name, CollectionManager, USERS_COLLECTION};
use crate::query::{execute as execute_query, QuerySpec};
use crate::replay;
use crate::tiering;
use crate::txn::TransactionManager;
use crate::users;
use chrono::{Months, Utc};
use ember_core::{
    Action, AllowAll, Authorizer, Command, EmberError, EngineConfig, Identity, Result, WalEntry,
    WriteKind, WriteOp,
};
use ember_durability::{DatabasePaths, WalWriter};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const COMPACTION_INTERVAL: Duration = Duration::from_secs(24 * 3_600);

/// The in-process document database engine.
pub struct Database {
    config: EngineConfig,
    collections: Arc<CollectionManager>,
    txns: Arc<TransactionManager>,
    wal: Option<Arc<WalWriter>>,
    authorizer: Arc<dyn Authorizer>,
    workers: Mutex<Vec<PeriodicWorker>>,
    gc_worker: Mutex<Option<PeriodicWorker>>,
    closed: AtomicBool,
}

impl Database {
    /// Open a database with the permissive authorizer. Embedded use.
    pub fn open(root: impl AsRef<Path>, config: EngineConfig) -> Result<Database> {
        Self::open_with_authorizer(root, config, Arc::new(AllowAll))
    }

    /// Open a database with an explicit authorization callback.
    pub fn open_with_authorizer(
        root: impl AsRef<Path>,
        config: EngineConfig,
        authorizer: Arc<dyn Authorizer>,
    ) -> Result<Database> {
        config.validate()?;
        let paths = DatabasePaths::new(root.as_ref());
        let collections = Arc::new(CollectionManager::new(paths.clone(), config.shard_count)?);

        collections.load_from_disk(cold_threshold(&config))?;

        // Replay before the writer reopens the active segment for append
        let wal = if config.wal_enabled {
            let recovered = ember_durability::read_all(&paths.wal_dir())?;
            if recovered.truncated_tails > 0 {
                warn!(
                    discarded = recovered.truncated_tails,
                    "WAL had truncated tail records"
                );
            }
            replay::replay(&collections, recovered.entries)?;
            Some(Arc::new(WalWriter::open(&paths.wal_dir())?))
        } else {
            None
        };

        let txns = Arc::new(TransactionManager::new());

        let db = Database {
            config,
            collections,
            txns,
            wal,
            authorizer,
            workers: Mutex::new(Vec::new()),
            gc_worker: Mutex::new(None),
            closed: AtomicBool::new(false),
        };

        db.seed_default_users()?;
        db.spawn_workers();
        info!(root = %paths.root().display(), "database open");
        Ok(db)
    }

    fn seed_default_users(&self) -> Result<()> {
        let store = self.collections.get_collection(USERS_COLLECTION);
        let exists = store.contains(users::ROOT_USERNAME)
            || self
                .collections
                .cold_key_exists(USERS_COLLECTION, users::ROOT_USERNAME)?;
        if exists {
            return Ok(());
        }

        let seeds = [
            (users::ROOT_USERNAME, &self.config.root_password, users::ROLE_ROOT),
            (
                users::ADMIN_USERNAME,
                &self.config.admin_password,
                users::ROLE_ADMIN,
            ),
        ];
        let tx = self.txns.begin();
        for (username, password, role) in seeds {
            let doc = users::user_doc(username, password, role);
            self.txns.record_write(
                tx,
                WriteOp {
                    collection: USERS_COLLECTION.to_string(),
                    key: username.to_string(),
                    value: serde_json::to_vec(&doc)
                        .map_err(|e| EmberError::internal(format!("seed encode: {}", e)))?,
                    ttl_seconds: 0,
                    kind: WriteKind::Set,
                },
            )?;
        }
        self.txns.commit(tx, &self.collections, self.wal.as_deref())?;
        info!("seeded default root and admin users");
        Ok(())
    }

    fn spawn_workers(&self) {
        let mut workers = self.workers.lock();

        {
            let collections = Arc::clone(&self.collections);
            workers.push(PeriodicWorker::spawn(
                "ember-ttl-sweep",
                self.config.ttl_sweep_interval(),
                move || {
                    let mut changed = collections.main_store().clean_expired_items();
                    for name in collections.collection_names() {
                        if let Some(store) = collections.get_existing(&name) {
                            changed |= store.clean_expired_items();
                        }
                    }
                    if changed {
                        tracing::debug!("TTL sweep removed expired items");
                    }
                },
            ));
        }

        if self.config.checkpoint_enabled {
            let collections = Arc::clone(&self.collections);
            let wal = self.wal.clone();
            workers.push(PeriodicWorker::spawn(
                "ember-checkpoint",
                self.config.checkpoint_interval(),
                move || checkpoint::checkpoint_tick(&collections, wal.as_deref()),
            ));
        }

        if self.config.tiering_enabled() {
            let collections = Arc::clone(&self.collections);
            let cold_months = self.config.cold_months;
            workers.push(PeriodicWorker::spawn(
                "ember-cold-evict",
                self.config.hot_eviction_interval(),
                move || {
                    tiering::run_cold_eviction(&collections, cold_months);
                },
            ));
        }

        {
            let collections = Arc::clone(&self.collections);
            workers.push(PeriodicWorker::spawn(
                "ember-compaction",
                COMPACTION_INTERVAL,
                move || {
                    tiering::run_compaction(&collections);
                },
            ));
        }

        {
            let collections = Arc::clone(&self.collections);
            let txns = Arc::clone(&self.txns);
            let timeout = self.config.tx_gc_timeout();
            *self.gc_worker.lock() = Some(PeriodicWorker::spawn(
                "ember-txn-gc",
                self.config.tx_gc_interval(),
                move || {
                    let collected = txns.gc_abandoned(timeout, &collections);
                    if collected > 0 {
                        warn!(collected, "abandoned transactions rolled back");
                    }
                },
            ));
        }
    }

    /// The engine configuration this database was opened with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The collection manager (test and tooling access).
    pub fn collections(&self) -> &Arc<CollectionManager> {
        &self.collections
    }

    /// Execute one typed command on behalf of `identity`.
    pub fn execute(&self, command: Command, identity: &Identity) -> Result<Value> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EmberError::internal("database is shut down"));
        }

        let (action, scope) = classify(&command);
        if !self.authorizer.allow(identity, action, scope.as_deref()) {
            return Err(EmberError::unauthorized(format!(
                "{:?} on {}",
                action,
                scope.as_deref().unwrap_or("<main>")
            )));
        }

        self.dispatch(command)
    }

    fn dispatch(&self, command: Command) -> Result<Value> {
        match command {
            Command::Set {
                key,
                value,
                ttl_seconds,
            } => {
                if key.is_empty() {
                    return Err(EmberError::bad_request("key must not be empty"));
                }
                self.wal_append(&WalEntry::SetMain {
                    key: key.clone(),
                    value: value.clone(),
                    ttl_seconds,
                })?;
                self.collections.main_store().set(
                    &key,
                    value,
                    ember_core::Item::ttl_from_seconds(ttl_seconds),
                );
                self.collections.enqueue_save(None, Vec::new());
                Ok(ok())
            }

            Command::CollectionCreate { name } => {
                validate_collection_name(&name)?;
                self.wal_append(&WalEntry::CollectionCreate { name: name.clone() })?;
                self.collections.get_collection(&name);
                self.collections.enqueue_save(Some(&name), Vec::new());
                Ok(ok())
            }

            Command::CollectionDelete { name } => {
                validate_collection_name(&name)?;
                let exists = self.collections.get_existing(&name).is_some()
                    || self.collections.collection_path(&name).exists();
                if !exists {
                    return Err(EmberError::not_found(format!("collection '{}'", name)));
                }
                self.wal_append(&WalEntry::CollectionDelete { name: name.clone() })?;
                self.collections.delete_collection(&name)?;
                Ok(ok())
            }

            Command::CollectionIndexCreate { name, field } => {
                validate_collection_name(&name)?;
                if field.is_empty() {
                    return Err(EmberError::bad_request("index field must not be empty"));
                }
                self.wal_append(&WalEntry::IndexCreate {
                    collection: name.clone(),
                    field: field.clone(),
                })?;
                self.collections.get_collection(&name).create_index(&field);
                self.collections.enqueue_save(Some(&name), Vec::new());
                Ok(ok())
            }

            Command::CollectionIndexDelete { name, field } => {
                validate_collection_name(&name)?;
                let store = self
                    .collections
                    .get_existing(&name)
                    .ok_or_else(|| EmberError::not_found(format!("collection '{}'", name)))?;
                if !store.indexes().has_field(&field) {
                    return Err(EmberError::not_found(format!(
                        "index '{}' on collection '{}'",
                        field, name
                    )));
                }
                self.wal_append(&WalEntry::IndexDelete {
                    collection: name.clone(),
                    field: field.clone(),
                })?;
                store.drop_index(&field);
                self.collections.enqueue_save(Some(&name), Vec::new());
                Ok(ok())
            }

            Command::CollectionItemSet {
                name,
                key,
                value,
                ttl_seconds,
                tx,
            } => self.mutate(
                tx,
                vec![WriteOp {
                    collection: name,
                    key,
                    value,
                    ttl_seconds,
                    kind: WriteKind::Set,
                }],
            ),

            Command::CollectionItemSetMany { name, items, tx } => self.mutate(
                tx,
                items
                    .into_iter()
                    .map(|item| WriteOp {
                        collection: name.clone(),
                        key: item.key,
                        value: item.value,
                        ttl_seconds: 0,
                        kind: WriteKind::Set,
                    })
                    .collect(),
            ),

            Command::CollectionItemUpdate {
                name,
                key,
                patch,
                tx,
            } => self.mutate(
                tx,
                vec![WriteOp {
                    collection: name,
                    key,
                    value: patch,
                    ttl_seconds: 0,
                    kind: WriteKind::Update,
                }],
            ),

            Command::CollectionItemUpdateMany { name, patches, tx } => self.mutate(
                tx,
                patches
                    .into_iter()
                    .map(|item| WriteOp {
                        collection: name.clone(),
                        key: item.key,
                        value: item.value,
                        ttl_seconds: 0,
                        kind: WriteKind::Update,
                    })
                    .collect(),
            ),

            Command::CollectionItemDelete { name, key, tx } => self.mutate(
                tx,
                vec![WriteOp {
                    collection: name,
                    key,
                    value: Vec::new(),
                    ttl_seconds: 0,
                    kind: WriteKind::Delete,
                }],
            ),

            Command::CollectionItemDeleteMany { name, keys, tx } => self.mutate(
                tx,
                keys.into_iter()
                    .map(|key| WriteOp {
                        collection: name.clone(),
                        key,
                        value: Vec::new(),
                        ttl_seconds: 0,
                        kind: WriteKind::Delete,
                    })
                    .collect(),
            ),

            Command::CollectionQuery { name, query } => {
                validate_collection_name(&name)?;
                let in_memory = self.collections.get_existing(&name);
                let has_file = self.collections.collection_path(&name).exists();
                if in_memory.is_none() && !has_file {
                    return Err(EmberError::not_found(format!("collection '{}'", name)));
                }
                let store = in_memory.unwrap_or_else(|| self.collections.get_collection(&name));
                let spec = QuerySpec::parse(&query)?;
                let path = self.collections.collection_path(&name);
                execute_query(&spec, &store, Some(&path))
            }

            Command::Begin => {
                let tx = self.txns.begin();
                Ok(json!({ "tx_id": tx }))
            }
            Command::Commit { tx_id } => {
                self.txns
                    .commit(tx_id, &self.collections, self.wal.as_deref())?;
                Ok(ok())
            }
            Command::Rollback { tx_id } => {
                self.txns.rollback(tx_id, &self.collections)?;
                Ok(ok())
            }

            Command::UserCreate {
                username,
                password,
                role,
            } => {
                if username.is_empty() || password.is_empty() {
                    return Err(EmberError::bad_request(
                        "username and password must not be empty",
                    ));
                }
                let doc = users::user_doc(&username, &password, &role);
                self.mutate(
                    None,
                    vec![WriteOp {
                        collection: USERS_COLLECTION.to_string(),
                        key: username,
                        value: serde_json::to_vec(&doc)
                            .map_err(|e| EmberError::internal(format!("user encode: {}", e)))?,
                        ttl_seconds: 0,
                        kind: WriteKind::Set,
                    }],
                )
            }

            Command::UserUpdate { username, patch } => self.mutate(
                None,
                vec![WriteOp {
                    collection: USERS_COLLECTION.to_string(),
                    key: username,
                    value: serde_json::to_vec(&patch)
                        .map_err(|e| EmberError::internal(format!("patch encode: {}", e)))?,
                    ttl_seconds: 0,
                    kind: WriteKind::Update,
                }],
            ),

            Command::UserChangePassword {
                username,
                new_password,
            } => {
                if new_password.is_empty() {
                    return Err(EmberError::bad_request("password must not be empty"));
                }
                let patch = users::password_patch(&new_password);
                self.mutate(
                    None,
                    vec![WriteOp {
                        collection: USERS_COLLECTION.to_string(),
                        key: username,
                        value: serde_json::to_vec(&patch)
                            .map_err(|e| EmberError::internal(format!("patch encode: {}", e)))?,
                        ttl_seconds: 0,
                        kind: WriteKind::Update,
                    }],
                )
            }

            Command::UserDelete { username } => {
                if username == users::ROOT_USERNAME {
                    return Err(EmberError::bad_request("the root user cannot be deleted"));
                }
                self.mutate(
                    None,
                    vec![WriteOp {
                        collection: USERS_COLLECTION.to_string(),
                        key: username,
                        value: Vec::new(),
                        ttl_seconds: 0,
                        kind: WriteKind::Delete,
                    }],
                )
            }

            Command::Restore { backup_name } => self.restore(&backup_name),
        }
    }

    /// Record ops into an open transaction, or run them as an implicit
    /// single-commit transaction.
    fn mutate(&self, tx: Option<Uuid>, ops: Vec<WriteOp>) -> Result<Value> {
        for op in &ops {
            validate_collection_name(&op.collection)?;
            if op.key.is_empty() {
                return Err(EmberError::bad_request("item key must not be empty"));
            }
        }

        match tx {
            Some(tx_id) => {
                for op in ops {
                    self.txns.record_write(tx_id, op)?;
                }
                Ok(ok())
            }
            None => {
                let tx_id = self.txns.begin();
                for op in ops {
                    if let Err(e) = self.txns.record_write(tx_id, op) {
                        let _ = self.txns.rollback(tx_id, &self.collections);
                        return Err(e);
                    }
                }
                self.txns
                    .commit(tx_id, &self.collections, self.wal.as_deref())?;
                Ok(ok())
            }
        }
    }

    /// Destructive restore: replace all state with a named backup.
    ///
    /// Expects the backup directory to mirror the data layout (`main.db`,
    /// `collections/*.col`) as produced by the external backup scheduler.
    /// The WAL is rotated and purged afterwards: its old contents describe
    /// the replaced state and must not replay over the restored one.
    fn restore(&self, backup_name: &str) -> Result<Value> {
        let paths = self.collections.paths().clone();
        let backup = paths.backup_dir(backup_name);
        if !backup.is_dir() {
            return Err(EmberError::not_found(format!("backup '{}'", backup_name)));
        }

        // Quiesce pending writes, then swap files under the file locks
        self.collections.flush();

        {
            let guard = self.collections.file_lock(None);
            let _held = guard.lock();
            let src = backup.join("main.db");
            if src.exists() {
                std::fs::copy(&src, paths.main_store_file())?;
            } else {
                let _ = std::fs::remove_file(paths.main_store_file());
            }
        }

        for name in paths.existing_collections()? {
            let guard = self.collections.file_lock(Some(&name));
            let _held = guard.lock();
            std::fs::remove_file(paths.collection_file(&name))?;
        }
        let backup_collections = backup.join("collections");
        if backup_collections.is_dir() {
            for entry in std::fs::read_dir(&backup_collections)? {
                let entry = entry?;
                let file_name = entry.file_name();
                let target = paths.collections_dir().join(&file_name);
                std::fs::copy(entry.path(), target)?;
            }
        }

        self.collections.clear_memory();
        self.collections.load_from_disk(cold_threshold(&self.config))?;

        if let Some(wal) = &self.wal {
            let seq = wal.rotate()?;
            wal.purge_segments_before(seq)?;
        }

        info!(backup = backup_name, "restore complete");
        Ok(ok())
    }

    fn wal_append(&self, entry: &WalEntry) -> Result<()> {
        if let Some(wal) = &self.wal {
            wal.append(entry)?;
        }
        Ok(())
    }

    /// Clean shutdown: stop and join maintenance workers, flush the async
    /// save queue, stop the transaction GC, write a final checkpoint, sync
    /// the WAL. Idempotent; also runs on drop.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        for mut worker in self.workers.lock().drain(..) {
            worker.stop();
        }

        self.collections.flush();

        if let Some(mut gc) = self.gc_worker.lock().take() {
            gc.stop();
        }

        if let Err(e) = checkpoint::run_checkpoint(&self.collections, self.wal.as_deref()) {
            warn!(error = %e, "final checkpoint failed");
        }

        if let Some(wal) = &self.wal {
            if let Err(e) = wal.sync() {
                warn!(error = %e, "final WAL sync failed");
            }
        }

        self.collections.shutdown();
        info!("database shut down");
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn ok() -> Value {
    json!({ "ok": true })
}

fn cold_threshold(config: &EngineConfig) -> Option<chrono::DateTime<Utc>> {
    if config.tiering_enabled() {
        Utc::now().checked_sub_months(Months::new(config.cold_months))
    } else {
        None
    }
}

/// Map a command to the action the authorizer is asked about, plus the
/// collection scope. Writes to the system users collection always require
/// Admin, whichever command spelled them.
fn classify(command: &Command) -> (Action, Option<String>) {
    let scoped = |action: Action, name: &str| -> (Action, Option<String>) {
        if name == USERS_COLLECTION {
            (Action::Admin, Some(name.to_string()))
        } else {
            (action, Some(name.to_string()))
        }
    };

    match command {
        Command::Set { .. } => (Action::Write, None),
        Command::CollectionCreate { name }
        | Command::CollectionDelete { name }
        | Command::CollectionIndexCreate { name, .. }
        | Command::CollectionIndexDelete { name, .. } => (Action::Admin, Some(name.clone())),
        Command::CollectionItemSet { name, .. }
        | Command::CollectionItemSetMany { name, .. }
        | Command::CollectionItemUpdate { name, .. }
        | Command::CollectionItemUpdateMany { name, .. }
        | Command::CollectionItemDelete { name, .. }
        | Command::CollectionItemDeleteMany { name, .. } => scoped(Action::Write, name),
        Command::CollectionQuery { name, .. } => scoped(Action::Read, name),
        Command::Begin | Command::Commit { .. } | Command::Rollback { .. } => (Action::Write, None),
        Command::UserCreate { .. }
        | Command::UserUpdate { .. }
        | Command::UserDelete { .. }
        | Command::UserChangePassword { .. } => (Action::Admin, Some(USERS_COLLECTION.to_string())),
        Command::Restore { .. } => (Action::Admin, None),
    }
}
