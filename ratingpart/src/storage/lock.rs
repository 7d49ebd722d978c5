//! Per-relation Write Locks — serializes writers on the same relation
//!
//! Two-layer locking:
//! Layer 1: parking_lot::Mutex — same-process threads
//! Layer 2: fs2 flock on the store's sidecar lock file — other processes
//!
//! Routed inserts read the base relation's row count right after their own
//! insert; holding this lock across (insert, count, partition write) keeps
//! another writer from interleaving.

use std::fs::{File, OpenOptions};
use std::sync::Arc;

use ahash::AHashMap;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

use super::{RelationName, RelationStore};
use crate::{PartError, Result};

static RELATION_WRITE_LOCKS: Lazy<RwLock<AHashMap<String, Arc<Mutex<()>>>>> =
    Lazy::new(|| RwLock::new(AHashMap::with_capacity(32)));

fn get_relation_lock(key: &str) -> Arc<Mutex<()>> {
    // Fast path: read-lock the map
    {
        let locks = RELATION_WRITE_LOCKS.read();
        if let Some(lock) = locks.get(key) {
            return lock.clone();
        }
    }
    RELATION_WRITE_LOCKS
        .write()
        .entry(key.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// Run `f` while holding the exclusive write lock for `name`
pub fn with_relation_lock<F, R>(store: &dyn RelationStore, name: &RelationName, f: F) -> Result<R>
where
    F: FnOnce() -> Result<R>,
{
    let lock = get_relation_lock(&store.lock_key(name));
    // Layer 1: in-process serialization
    let _guard = lock.lock();

    // Layer 2: cross-process serialization
    let file = match store.lock_file(name) {
        Some(path) => {
            let file: File = OpenOptions::new()
                .create(true)
                .write(true)
                .open(&path)
                .map_err(|e| {
                    PartError::StorageUnavailable(format!("lock {}: {}", path.display(), e))
                })?;
            fs2::FileExt::lock_exclusive(&file).map_err(|e| {
                PartError::StorageUnavailable(format!("lock {}: {}", path.display(), e))
            })?;
            Some(file)
        }
        None => None,
    };

    let result = f();

    if let Some(file) = file {
        let _ = fs2::FileExt::unlock(&file);
    }
    result
}
