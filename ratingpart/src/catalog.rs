//! Partition Catalog - how many partitions of a strategy exist
//!
//! The count is derived on every call by listing the store's relations, never
//! cached, so it reflects partitions created by another process or an earlier
//! run just as well as ones created a moment ago.

use crate::storage::{RelationName, RelationStore};
use crate::{PartError, Result};

/// Name-convention view over a store's relations
pub struct PartitionCatalog<'a> {
    store: &'a dyn RelationStore,
}

impl<'a> PartitionCatalog<'a> {
    pub fn new(store: &'a dyn RelationStore) -> Self {
        Self { store }
    }

    /// Number of relations named `<prefix><index>`
    pub fn count(&self, prefix: &str) -> Result<usize> {
        Ok(self.partitions(prefix)?.len())
    }

    /// Partition names for `prefix`, ordered by index
    pub fn partitions(&self, prefix: &str) -> Result<Vec<RelationName>> {
        let names = self.store.list_relations(prefix).map_err(|e| match e {
            PartError::StorageUnavailable(msg) => PartError::StorageUnavailable(msg),
            other => PartError::StorageUnavailable(format!("listing '{}': {}", prefix, other)),
        })?;

        let mut indexed: Vec<(usize, RelationName)> = names
            .iter()
            .filter_map(|name| {
                let index = RelationName::partition_index(name, prefix)?;
                RelationName::new(name).ok().map(|n| (index, n))
            })
            .collect();
        indexed.sort_by_key(|(index, _)| *index);
        Ok(indexed.into_iter().map(|(_, name)| name).collect())
    }
}

/// Drop every partition of `prefix`; returns how many were removed
pub fn drop_partitions(store: &dyn RelationStore, prefix: &str) -> Result<usize> {
    let partitions = PartitionCatalog::new(store).partitions(prefix)?;
    for name in &partitions {
        store.drop_relation(name)?;
    }
    log::info!("Dropped {} partitions with prefix '{}'", partitions.len(), prefix);
    Ok(partitions.len())
}
