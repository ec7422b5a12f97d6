//! Collection registry and asynchronous persistence.
//!
//! The manager owns the main store and every named collection, creates
//! collections lazily (double-checked under the registry write lock), and
//! runs the single persistence worker that drains the bounded save and
//! delete queues. Each file operation holds that collection's file lock, so
//! checkpoint saves and compaction rewrites serialize against the worker.
//!
//! A save task snapshots the collection's live data *and* its indexed field
//! names at enqueue time; later mutations never race the saver. When a
//! queue is full the task is dropped with a warning; saves are idempotent
//! and the next mutation enqueues a fresh one.
//!
//! # File merge semantics
//!
//! A collection file can hold records that are no longer in memory (cold
//! data). The saver therefore merges instead of overwriting: records
//! present in the hot snapshot are rewritten in place, records deleted by
//! the triggering commit are tombstoned (`_deleted: true`), and everything
//! else is kept verbatim. New hot keys are appended at the end.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ember_core::{document, EmberError, Item, Result};
use ember_durability::DatabasePaths;
use ember_storage::collection_file::{self, RewriteAction};
use ember_storage::InMemStore;
use parking_lot::{Condvar, Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Name of the system collection holding user documents.
pub const USERS_COLLECTION: &str = "_users";

const SAVE_QUEUE_CAP: usize = 1024;
const DELETE_QUEUE_CAP: usize = 256;

/// Validate a caller-supplied collection name.
///
/// Names are path components, so the alphabet is restricted. The leading
/// underscore is reserved for system collections.
pub fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 128 {
        return Err(EmberError::bad_request(
            "collection name must be 1..=128 characters",
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(EmberError::bad_request(
            "collection name may only contain [A-Za-z0-9_-]",
        ));
    }
    Ok(())
}

/// A snapshot-carrying save task. `name` of `None` targets the main store.
struct SaveTask {
    name: Option<String>,
    fields: Vec<String>,
    hot: HashMap<String, Vec<u8>>,
    deleted: Vec<String>,
}

struct Queues {
    save: VecDeque<SaveTask>,
    delete: VecDeque<String>,
    in_flight: bool,
    shutdown: bool,
}

/// Registry of stores plus the persistence worker.
pub struct CollectionManager {
    main: Arc<InMemStore>,
    collections: RwLock<HashMap<String, Arc<InMemStore>>>,
    shard_count: usize,
    paths: DatabasePaths,
    queues: Arc<(Mutex<Queues>, Condvar)>,
    file_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CollectionManager {
    /// Create the manager and spawn its persistence worker.
    pub fn new(paths: DatabasePaths, shard_count: usize) -> Result<Self> {
        paths.ensure_layout()?;

        let queues = Arc::new((
            Mutex::new(Queues {
                save: VecDeque::new(),
                delete: VecDeque::new(),
                in_flight: false,
                shutdown: false,
            }),
            Condvar::new(),
        ));
        let file_locks: Arc<DashMap<String, Arc<Mutex<()>>>> = Arc::new(DashMap::new());

        let worker = {
            let queues = Arc::clone(&queues);
            let file_locks = Arc::clone(&file_locks);
            let paths = paths.clone();
            std::thread::Builder::new()
                .name("ember-persist".to_string())
                .spawn(move || persistence_loop(&queues, &file_locks, &paths))
                .map_err(|e| EmberError::internal(format!("failed to spawn saver: {}", e)))?
        };

        Ok(CollectionManager {
            main: Arc::new(InMemStore::new(shard_count)),
            collections: RwLock::new(HashMap::new()),
            shard_count,
            paths,
            queues,
            file_locks,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// The main store.
    pub fn main_store(&self) -> &Arc<InMemStore> {
        &self.main
    }

    /// The database paths this manager persists into.
    pub fn paths(&self) -> &DatabasePaths {
        &self.paths
    }

    /// Get a collection, creating it empty on first reference.
    ///
    /// Creation is race-free: the fast path checks under the read lock, the
    /// slow path re-checks under the write lock before inserting.
    pub fn get_collection(&self, name: &str) -> Arc<InMemStore> {
        if let Some(store) = self.collections.read().get(name) {
            return Arc::clone(store);
        }
        let mut map = self.collections.write();
        if let Some(store) = map.get(name) {
            return Arc::clone(store);
        }
        let store = Arc::new(InMemStore::new(self.shard_count));
        map.insert(name.to_string(), Arc::clone(&store));
        debug!(collection = name, "collection created");
        store
    }

    /// Get a collection only if it already exists.
    pub fn get_existing(&self, name: &str) -> Option<Arc<InMemStore>> {
        self.collections.read().get(name).map(Arc::clone)
    }

    /// Names of all in-memory collections, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop a collection from memory and enqueue deletion of its file.
    pub fn delete_collection(&self, name: &str) -> Result<()> {
        let existed = self.collections.write().remove(name).is_some();
        let file_exists = self.paths.collection_file(name).exists();
        if !existed && !file_exists {
            return Err(EmberError::not_found(format!("collection '{}'", name)));
        }

        let (lock, cvar) = &*self.queues;
        let mut queues = lock.lock();
        if queues.delete.len() >= DELETE_QUEUE_CAP {
            warn!(collection = name, "delete queue full, dropping task");
            return Ok(());
        }
        queues.delete.push_back(name.to_string());
        cvar.notify_all();
        Ok(())
    }

    // ========================================================================
    // Async persistence
    // ========================================================================

    /// Enqueue an asynchronous save of a collection (or the main store when
    /// `name` is `None`).
    ///
    /// Snapshots the live data and the indexed field names before
    /// returning. `deleted` lists keys removed by the triggering commit so
    /// the saver can tombstone their file records.
    pub fn enqueue_save(&self, name: Option<&str>, deleted: Vec<String>) {
        let store = match name {
            None => Arc::clone(&self.main),
            Some(n) => match self.get_existing(n) {
                Some(s) => s,
                None => return,
            },
        };

        let task = SaveTask {
            name: name.map(str::to_string),
            fields: store.indexes().field_names(),
            hot: store
                .get_all()
                .into_iter()
                .map(|(k, item)| (k, item.value))
                .collect(),
            deleted,
        };

        let (lock, cvar) = &*self.queues;
        let mut queues = lock.lock();
        if queues.shutdown {
            warn!(collection = ?name, "saver is shut down, dropping save task");
            return;
        }
        if queues.save.len() >= SAVE_QUEUE_CAP {
            warn!(collection = ?name, "save queue full, dropping task");
            return;
        }
        queues.save.push_back(task);
        cvar.notify_all();
    }

    /// Block until both queues are empty and no task is in flight.
    pub fn flush(&self) {
        let (lock, cvar) = &*self.queues;
        let mut queues = lock.lock();
        while !queues.save.is_empty() || !queues.delete.is_empty() || queues.in_flight {
            cvar.wait(&mut queues);
        }
    }

    /// Drain the queues and stop the persistence worker. Idempotent.
    pub fn shutdown(&self) {
        {
            let (lock, cvar) = &*self.queues;
            let mut queues = lock.lock();
            queues.shutdown = true;
            cvar.notify_all();
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    /// The per-collection file lock (shared with the checkpointer and the
    /// compactor). Main store uses the empty name.
    pub fn file_lock(&self, name: Option<&str>) -> Arc<Mutex<()>> {
        lock_for(&self.file_locks, name)
    }

    // ========================================================================
    // Synchronous persistence (checkpoint path)
    // ========================================================================

    /// Save a store to its file right now, under the file lock.
    pub fn save_now(&self, name: Option<&str>) -> Result<()> {
        let store = match name {
            None => Arc::clone(&self.main),
            Some(n) => self
                .get_existing(n)
                .ok_or_else(|| EmberError::not_found(format!("collection '{}'", n)))?,
        };
        let task = SaveTask {
            name: name.map(str::to_string),
            fields: store.indexes().field_names(),
            hot: store
                .get_all()
                .into_iter()
                .map(|(k, item)| (k, item.value))
                .collect(),
            deleted: Vec::new(),
        };
        let guard = self.file_lock(name);
        let _held = guard.lock();
        run_save(&self.paths, task)
    }

    // ========================================================================
    // Cold access
    // ========================================================================

    /// Path of a collection's file.
    pub fn collection_path(&self, name: &str) -> PathBuf {
        self.paths.collection_file(name)
    }

    /// Whether a key exists in a collection's cold file (key-only probe,
    /// values are never decoded).
    pub fn cold_key_exists(&self, name: &str, key: &str) -> Result<bool> {
        let path = self.paths.collection_file(name);
        if !path.exists() {
            return Ok(false);
        }
        collection_file::check_cold_key_exists(&path, key)
    }

    /// Probe many keys in one file pass.
    pub fn cold_keys_exist(&self, name: &str, keys: &HashSet<String>) -> Result<HashSet<String>> {
        let path = self.paths.collection_file(name);
        if !path.exists() {
            return Ok(HashSet::new());
        }
        collection_file::check_many_cold_keys_exist(&path, keys)
    }

    /// Read one value from the cold file, skipping tombstones.
    pub fn cold_value(&self, name: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.paths.collection_file(name);
        if !path.exists() {
            return Ok(None);
        }
        let mut reader = collection_file::CollectionFileReader::open(&path)?;
        while let Some((k, v)) = reader.next_record()? {
            if k == key {
                if let Some(doc) = document::decode(&v) {
                    if document::is_tombstone(&doc) {
                        return Ok(None);
                    }
                }
                return Ok(Some(v));
            }
        }
        Ok(None)
    }

    // ========================================================================
    // Startup loading
    // ========================================================================

    /// Load the main store and every collection file into memory.
    ///
    /// Documents older than `cold_threshold` stay on disk (cold);
    /// tombstoned records are never loaded. `created_at` is preserved as
    /// stored; TTLs are not persisted and come back as zero.
    pub fn load_from_disk(&self, cold_threshold: Option<DateTime<Utc>>) -> Result<()> {
        let main_path = self.paths.main_store_file();
        if main_path.exists() {
            load_into(&self.main, &main_path, cold_threshold)?;
        }

        for name in self.paths.existing_collections()? {
            let store = self.get_collection(&name);
            load_into(&store, &self.paths.collection_file(&name), cold_threshold)?;
        }
        Ok(())
    }

    /// Wipe all in-memory state. The restore path reloads from the copied
    /// backup files afterwards.
    pub fn clear_memory(&self) {
        self.collections.write().clear();
        self.main.clear();
    }
}

impl Drop for CollectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock_for(locks: &DashMap<String, Arc<Mutex<()>>>, name: Option<&str>) -> Arc<Mutex<()>> {
    let key = name.unwrap_or("").to_string();
    locks
        .entry(key)
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

fn load_into(
    store: &InMemStore,
    path: &std::path::Path,
    cold_threshold: Option<DateTime<Utc>>,
) -> Result<()> {
    let mut reader = collection_file::CollectionFileReader::open(path)?;
    for field in reader.indexed_fields().to_vec() {
        store.create_index(&field);
    }

    let now = Utc::now();
    let mut loaded = 0usize;
    let mut skipped_cold = 0usize;
    while let Some((key, value)) = reader.next_record()? {
        let doc = document::decode(&value);
        if let Some(doc) = &doc {
            if document::is_tombstone(doc) {
                continue;
            }
        }
        let created_at = doc
            .as_ref()
            .and_then(document::created_at)
            .unwrap_or(now);
        if let Some(threshold) = cold_threshold {
            if created_at < threshold {
                skipped_cold += 1;
                continue;
            }
        }
        store.set_item(&key, Item::new(value, created_at, Duration::ZERO));
        loaded += 1;
    }
    debug!(path = %path.display(), loaded, skipped_cold, "loaded store file");
    Ok(())
}

// ============================================================================
// Persistence worker
// ============================================================================

fn persistence_loop(
    queues: &Arc<(Mutex<Queues>, Condvar)>,
    file_locks: &Arc<DashMap<String, Arc<Mutex<()>>>>,
    paths: &DatabasePaths,
) {
    let (lock, cvar) = &**queues;
    loop {
        enum Work {
            Save(SaveTask),
            Delete(String),
        }

        let work = {
            let mut queues = lock.lock();
            loop {
                if let Some(name) = queues.delete.pop_front() {
                    queues.in_flight = true;
                    break Some(Work::Delete(name));
                }
                if let Some(task) = queues.save.pop_front() {
                    queues.in_flight = true;
                    break Some(Work::Save(task));
                }
                if queues.shutdown {
                    break None;
                }
                cvar.wait(&mut queues);
            }
        };

        let Some(work) = work else { break };

        match work {
            Work::Save(task) => {
                let name = task.name.clone();
                let guard = lock_for(file_locks, name.as_deref());
                let _held = guard.lock();
                if let Err(e) = run_save(paths, task) {
                    error!(collection = ?name, error = %e, "async save failed");
                }
            }
            Work::Delete(name) => {
                let guard = lock_for(file_locks, Some(&name));
                let _held = guard.lock();
                let path = paths.collection_file(&name);
                match std::fs::remove_file(&path) {
                    Ok(()) => debug!(collection = %name, "collection file removed"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => error!(collection = %name, error = %e, "collection file delete failed"),
                }
            }
        }

        let mut queues = lock.lock();
        queues.in_flight = false;
        cvar.notify_all();
    }
}

fn tombstoned(old: &[u8], key: &str) -> Vec<u8> {
    let mut doc = document::decode(old).unwrap_or_else(|| {
        serde_json::json!({ document::FIELD_ID: key })
    });
    if let Some(obj) = doc.as_object_mut() {
        obj.insert(document::FIELD_DELETED.to_string(), Value::Bool(true));
    }
    serde_json::to_vec(&doc).unwrap_or_else(|_| old.to_vec())
}

fn run_save(paths: &DatabasePaths, task: SaveTask) -> Result<()> {
    let path = match &task.name {
        None => paths.main_store_file(),
        Some(name) => paths.collection_file(name),
    };

    let deleted: HashSet<String> = task.deleted.iter().cloned().collect();

    if !path.exists() {
        let mut entries: Vec<(&str, &[u8])> = task
            .hot
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
            .collect();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        return collection_file::save(&path, &task.fields, entries);
    }

    // Header fields changed (index created or dropped since the last save):
    // rebuild the whole file so the header reflects the current index set
    let file_fields = collection_file::CollectionFileReader::open(&path)?
        .indexed_fields()
        .to_vec();
    if file_fields != task.fields {
        return rebuild_file(&path, &task, &deleted);
    }

    let hot = &task.hot;
    let seen: std::cell::RefCell<HashSet<String>> = std::cell::RefCell::new(HashSet::new());
    collection_file::rewrite_with(
        &path,
        |key, old| {
            seen.borrow_mut().insert(key.to_string());
            if let Some(new_value) = hot.get(key) {
                RewriteAction::Keep(new_value.clone())
            } else if deleted.contains(key) {
                RewriteAction::Keep(tombstoned(&old, key))
            } else {
                RewriteAction::Keep(old)
            }
        },
        || {
            let seen = seen.borrow();
            let mut extra: Vec<(String, Vec<u8>)> = hot
                .iter()
                .filter(|(k, _)| !seen.contains(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            extra.sort_by(|(a, _), (b, _)| a.cmp(b));
            extra
        },
    )?;
    Ok(())
}

/// Full rebuild: merge file records with the hot snapshot under the new
/// index header.
fn rebuild_file(path: &std::path::Path, task: &SaveTask, deleted: &HashSet<String>) -> Result<()> {
    let mut merged: Vec<(String, Vec<u8>)> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    let mut reader = collection_file::CollectionFileReader::open(path)?;
    while let Some((key, old)) = reader.next_record()? {
        seen.insert(key.clone());
        if let Some(new_value) = task.hot.get(&key) {
            merged.push((key, new_value.clone()));
        } else if deleted.contains(&key) {
            let value = tombstoned(&old, &key);
            merged.push((key, value));
        } else {
            merged.push((key, old));
        }
    }
    let mut extra: Vec<(String, Vec<u8>)> = task
        .hot
        .iter()
        .filter(|(k, _)| !seen.contains(*k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    extra.sort_by(|(a, _), (b, _)| a.cmp(b));
    merged.extend(extra);

    collection_file::save(
        path,
        &task.fields,
        merged.iter().map(|(k, v)| (k.as_str(), v.as_slice())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> CollectionManager {
        CollectionManager::new(DatabasePaths::new(dir.path()), 16).unwrap()
    }

    fn doc(v: &Value) -> Vec<u8> {
        serde_json::to_vec(v).unwrap()
    }

    #[test]
    fn test_validate_names() {
        assert!(validate_collection_name("people").is_ok());
        assert!(validate_collection_name("_users").is_ok());
        assert!(validate_collection_name("a-b_c9").is_ok());
        assert!(validate_collection_name("").is_err());
        assert!(validate_collection_name("has space").is_err());
        assert!(validate_collection_name("dot.dot").is_err());
        assert!(validate_collection_name("slash/slash").is_err());
    }

    #[test]
    fn test_lazy_creation_returns_same_store() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        assert!(mgr.get_existing("people").is_none());

        let a = mgr.get_collection("people");
        let b = mgr.get_collection("people");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(mgr.collection_names(), vec!["people"]);
        mgr.shutdown();
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let store = mgr.get_collection("people");
        store.create_index("age");
        store.set("d1", doc(&json!({"_id": "d1", "age": 30})), Duration::ZERO);

        mgr.enqueue_save(Some("people"), Vec::new());
        mgr.flush();
        mgr.shutdown();

        let mgr2 = manager(&dir);
        mgr2.load_from_disk(None).unwrap();
        let store2 = mgr2.get_existing("people").unwrap();
        assert!(store2.get("d1").is_some());
        // Index definitions come back from the file header
        assert!(store2.indexes().has_field("age"));
        assert!(store2
            .indexes()
            .lookup("age", &json!(30))
            .unwrap()
            .contains("d1"));
        mgr2.shutdown();
    }

    #[test]
    fn test_save_tombstones_deleted_keys() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let store = mgr.get_collection("people");
        store.set("d1", doc(&json!({"_id": "d1"})), Duration::ZERO);
        store.set("d2", doc(&json!({"_id": "d2"})), Duration::ZERO);
        mgr.enqueue_save(Some("people"), Vec::new());
        mgr.flush();

        store.delete("d1");
        mgr.enqueue_save(Some("people"), vec!["d1".to_string()]);
        mgr.flush();
        mgr.shutdown();

        // d1 is still physically present but tombstoned
        let mut reader =
            collection_file::CollectionFileReader::open(&dir.path().join("collections/people.col"))
                .unwrap();
        let mut saw_tombstone = false;
        let mut live = 0;
        while let Some((key, value)) = reader.next_record().unwrap() {
            let d = document::decode(&value).unwrap();
            if key == "d1" {
                assert!(document::is_tombstone(&d));
                saw_tombstone = true;
            } else {
                live += 1;
            }
        }
        assert!(saw_tombstone);
        assert_eq!(live, 1);
    }

    #[test]
    fn test_merge_preserves_cold_records() {
        let dir = TempDir::new().unwrap();
        let paths = DatabasePaths::new(dir.path());
        paths.ensure_layout().unwrap();
        // Seed a file with a cold record the store has never loaded
        let cold = doc(&json!({"_id": "cold1", "age": 99}));
        collection_file::save(
            &paths.collection_file("people"),
            &[],
            vec![("cold1", cold.as_slice())],
        )
        .unwrap();

        let mgr = manager(&dir);
        let store = mgr.get_collection("people");
        store.set("hot1", doc(&json!({"_id": "hot1"})), Duration::ZERO);
        mgr.enqueue_save(Some("people"), Vec::new());
        mgr.flush();
        mgr.shutdown();

        let mut reader =
            collection_file::CollectionFileReader::open(&paths.collection_file("people")).unwrap();
        let mut keys = Vec::new();
        while let Some((k, _)) = reader.next_record().unwrap() {
            keys.push(k);
        }
        keys.sort();
        assert_eq!(keys, vec!["cold1", "hot1"]);
    }

    #[test]
    fn test_cold_probes() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let store = mgr.get_collection("people");
        store.set("d1", doc(&json!({"_id": "d1", "x": 1})), Duration::ZERO);
        mgr.enqueue_save(Some("people"), Vec::new());
        mgr.flush();

        assert!(mgr.cold_key_exists("people", "d1").unwrap());
        assert!(!mgr.cold_key_exists("people", "nope").unwrap());
        assert!(!mgr.cold_key_exists("ghost-collection", "d1").unwrap());

        let v = mgr.cold_value("people", "d1").unwrap().unwrap();
        let d = document::decode(&v).unwrap();
        assert_eq!(d["x"], 1);
        mgr.shutdown();
    }

    #[test]
    fn test_delete_collection_removes_file() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let store = mgr.get_collection("temp");
        store.set("k", doc(&json!({"a": 1})), Duration::ZERO);
        mgr.enqueue_save(Some("temp"), Vec::new());
        mgr.flush();
        assert!(mgr.collection_path("temp").exists());

        mgr.delete_collection("temp").unwrap();
        mgr.flush();
        assert!(!mgr.collection_path("temp").exists());
        assert!(mgr.get_existing("temp").is_none());

        assert!(mgr.delete_collection("never-existed").is_err());
        mgr.shutdown();
    }

    #[test]
    fn test_cold_threshold_skips_old_docs_on_load() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let store = mgr.get_collection("people");
        store.set(
            "ancient",
            doc(&json!({"_id": "ancient", "created_at": "2015-01-01T00:00:00.000000Z"})),
            Duration::ZERO,
        );
        store.set(
            "fresh",
            doc(&json!({"_id": "fresh", "created_at": document::format_timestamp(Utc::now())})),
            Duration::ZERO,
        );
        mgr.enqueue_save(Some("people"), Vec::new());
        mgr.flush();
        mgr.shutdown();

        let mgr2 = manager(&dir);
        let threshold = Utc::now() - chrono::Duration::days(365);
        mgr2.load_from_disk(Some(threshold)).unwrap();
        let store2 = mgr2.get_existing("people").unwrap();
        assert!(store2.get("fresh").is_some());
        // Ancient doc stays cold: on disk, not in memory
        assert!(store2.get("ancient").is_none());
        assert!(mgr2.cold_key_exists("people", "ancient").unwrap());
        mgr2.shutdown();
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let store = mgr.get_collection("people");
        for i in 0..20 {
            store.set(&format!("d{}", i), doc(&json!({"i": i})), Duration::ZERO);
        }
        mgr.enqueue_save(Some("people"), Vec::new());
        mgr.shutdown();
        assert!(mgr.collection_path("people").exists());
    }
}
