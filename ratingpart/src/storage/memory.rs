//! In-memory relation store

use std::sync::atomic::{AtomicU64, Ordering};

use ahash::{AHashMap, AHashSet};
use parking_lot::RwLock;

use super::{RelationKind, RelationName, RelationStore};
use crate::data::{Rating, RowKey};
use crate::{PartError, Result};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

struct MemRelation {
    rows: Vec<Rating>,
    /// Present only for relations that enforce (user_id, item_id) uniqueness
    keys: Option<AHashSet<RowKey>>,
}

/// Relation store held entirely in process memory
pub struct MemoryStore {
    id: u64,
    relations: RwLock<AHashMap<String, MemRelation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::SeqCst),
            relations: RwLock::new(AHashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RelationStore for MemoryStore {
    fn list_relations(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .relations
            .read()
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    fn relation_exists(&self, name: &RelationName) -> Result<bool> {
        Ok(self.relations.read().contains_key(name.as_str()))
    }

    fn create_relation(&self, name: &RelationName, kind: RelationKind) -> Result<()> {
        let mut relations = self.relations.write();
        if relations.contains_key(name.as_str()) {
            return Err(PartError::RelationExists(name.to_string()));
        }
        let keys = kind.enforces_unique_key().then(AHashSet::new);
        relations.insert(name.to_string(), MemRelation { rows: Vec::new(), keys });
        Ok(())
    }

    fn drop_relation(&self, name: &RelationName) -> Result<()> {
        self.relations
            .write()
            .remove(name.as_str())
            .map(|_| ())
            .ok_or_else(|| PartError::RelationNotFound(name.to_string()))
    }

    fn scan(&self, name: &RelationName) -> Result<Vec<Rating>> {
        self.relations
            .read()
            .get(name.as_str())
            .map(|rel| rel.rows.clone())
            .ok_or_else(|| PartError::RelationNotFound(name.to_string()))
    }

    fn append(&self, name: &RelationName, rows: &[Rating]) -> Result<()> {
        let mut relations = self.relations.write();
        let rel = relations
            .get_mut(name.as_str())
            .ok_or_else(|| PartError::RelationNotFound(name.to_string()))?;

        if let Some(keys) = &mut rel.keys {
            // Validate the whole batch before touching the relation
            let mut batch = AHashSet::with_capacity(rows.len());
            for row in rows {
                let key = row.key();
                if keys.contains(&key) || !batch.insert(key) {
                    return Err(PartError::DuplicateKey {
                        relation: name.to_string(),
                        user_id: key.0,
                        item_id: key.1,
                    });
                }
            }
            keys.extend(batch);
        }
        rel.rows.extend_from_slice(rows);
        Ok(())
    }

    fn remove_row(&self, name: &RelationName, key: RowKey) -> Result<bool> {
        let mut relations = self.relations.write();
        let rel = relations
            .get_mut(name.as_str())
            .ok_or_else(|| PartError::RelationNotFound(name.to_string()))?;

        match rel.rows.iter().rposition(|r| r.key() == key) {
            Some(pos) => {
                rel.rows.remove(pos);
                if let Some(keys) = &mut rel.keys {
                    keys.remove(&key);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn row_count(&self, name: &RelationName) -> Result<u64> {
        self.relations
            .read()
            .get(name.as_str())
            .map(|rel| rel.rows.len() as u64)
            .ok_or_else(|| PartError::RelationNotFound(name.to_string()))
    }

    fn lock_key(&self, name: &RelationName) -> String {
        format!("mem:{}:{}", self.id, name)
    }
}

/// Memory store whose undo primitives (`remove_row`, `drop_relation`) fail
#[cfg(test)]
pub(crate) struct UndoFailingStore(pub MemoryStore);

#[cfg(test)]
impl RelationStore for UndoFailingStore {
    fn list_relations(&self, prefix: &str) -> Result<Vec<String>> {
        self.0.list_relations(prefix)
    }

    fn relation_exists(&self, name: &RelationName) -> Result<bool> {
        self.0.relation_exists(name)
    }

    fn create_relation(&self, name: &RelationName, kind: RelationKind) -> Result<()> {
        self.0.create_relation(name, kind)
    }

    fn drop_relation(&self, name: &RelationName) -> Result<()> {
        Err(PartError::StorageUnavailable(format!("cannot drop {}", name)))
    }

    fn scan(&self, name: &RelationName) -> Result<Vec<Rating>> {
        self.0.scan(name)
    }

    fn append(&self, name: &RelationName, rows: &[Rating]) -> Result<()> {
        self.0.append(name, rows)
    }

    fn remove_row(&self, name: &RelationName, _key: RowKey) -> Result<bool> {
        Err(PartError::StorageUnavailable(format!("cannot remove from {}", name)))
    }

    fn row_count(&self, name: &RelationName) -> Result<u64> {
        self.0.row_count(name)
    }

    fn lock_key(&self, name: &RelationName) -> String {
        self.0.lock_key(name)
    }
}
