//! Insert Router - writes one new row to the base relation and its partition
//!
//! Handles:
//! - Range routing: the row's rating picks the interval, using the same rule
//!   as the bulk range partitioner
//! - Round-robin routing: the row's rank is taken as the base relation's
//!   post-insert row count minus one
//!
//! The partition count is re-read from the [`PartitionCatalog`] on every
//! call. Each insert runs under the base relation's write lock and inside a
//! [`StoreTxn`], so the base write is undone if the partition write fails.
//! Ratings outside `[0, R_max]` are rejected before anything is written.

use crate::catalog::PartitionCatalog;
use crate::config::PartitionConfig;
use crate::data::Rating;
use crate::partition::{PartitionCount, RatingIntervals, RoundRobinPartitioner, Strategy};
use crate::storage::{with_relation_lock, RelationName, RelationStore, StoreTxn};
use crate::{OpContext, Result};

/// Where a routed insert landed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedInsert {
    pub strategy: Strategy,
    pub index: usize,
    pub partition: RelationName,
}

/// Routes single-row inserts into existing partition sets
pub struct InsertRouter<'a> {
    store: &'a dyn RelationStore,
    config: &'a PartitionConfig,
}

impl<'a> InsertRouter<'a> {
    pub fn new(store: &'a dyn RelationStore, config: &'a PartitionConfig) -> Self {
        Self { store, config }
    }

    /// Insert into the base relation and the range partition covering `row.rating`
    pub fn range_insert(&self, row: Rating) -> Result<RoutedInsert> {
        self.routed(Strategy::Range, row).op("range_insert")
    }

    /// Insert into the base relation and the next round-robin partition
    pub fn round_robin_insert(&self, row: Rating) -> Result<RoutedInsert> {
        self.routed(Strategy::RoundRobin, row).op("round_robin_insert")
    }

    fn routed(&self, strategy: Strategy, row: Rating) -> Result<RoutedInsert> {
        self.config.validate()?;
        let base = self.config.base()?;
        let prefix = self.config.prefix(strategy);

        // Base rows stay inside [0, R_max] whatever the strategy
        self.config.check_rating(row.rating)?;

        with_relation_lock(self.store, &base, || {
            let (index, partition) = StoreTxn::run(self.store, |txn| {
                txn.insert(&base, row)?;

                let catalog = PartitionCatalog::new(self.store);
                let count = PartitionCount::from_catalog(catalog.count(prefix)?, prefix)?;

                let index = match strategy {
                    Strategy::Range => {
                        RatingIntervals::new(self.config.rating_max, count).index_of(row.rating)?
                    }
                    Strategy::RoundRobin => {
                        // Our own insert is the newest row, so its rank is total - 1
                        let total = self.store.row_count(&base)?;
                        RoundRobinPartitioner::index_for_rank(total.saturating_sub(1), count)
                    }
                };

                let partition = RelationName::partition(prefix, index)?;
                txn.insert(&partition, row)?;
                Ok((index, partition))
            })?;

            log::debug!(
                "{} insert ({}, {}, {}) -> {}",
                strategy,
                row.user_id,
                row.item_id,
                row.rating,
                partition
            );
            Ok(RoutedInsert {
                strategy,
                index,
                partition,
            })
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{RangePartitioner, RoundRobinPartitioner};
    use crate::storage::memory::UndoFailingStore;
    use crate::storage::{FileStore, MemoryStore, RelationKind};
    use crate::PartError;

    fn base() -> RelationName {
        RelationName::new("ratings").unwrap()
    }

    fn seeded(store: &dyn RelationStore, rows: &[Rating]) {
        store.create_relation(&base(), RelationKind::Base).unwrap();
        store.append(&base(), rows).unwrap();
    }

    fn part(prefix: &str, i: usize) -> RelationName {
        RelationName::partition(prefix, i).unwrap()
    }

    #[test]
    fn test_range_insert_routing() {
        let store = MemoryStore::new();
        seeded(&store, &[]);
        let config = PartitionConfig::default();
        RangePartitioner::new(&config).partition(&store, 4).unwrap();

        let router = InsertRouter::new(&store, &config);
        let routed = router.range_insert(Rating::new(1, 1, 1.5)).unwrap();
        assert_eq!(routed.index, 1);
        assert_eq!(routed.partition.as_str(), "range_part1");

        let routed = router.range_insert(Rating::new(2, 2, 0.0)).unwrap();
        assert_eq!(routed.index, 0);

        assert_eq!(store.scan(&part("range_part", 1)).unwrap(), vec![Rating::new(1, 1, 1.5)]);
        assert_eq!(store.row_count(&part("range_part", 0)).unwrap(), 1);
        assert_eq!(store.row_count(&part("range_part", 2)).unwrap(), 0);
        assert_eq!(store.row_count(&base()).unwrap(), 2);
    }

    #[test]
    fn test_round_robin_insert_continues_cycle() {
        let store = MemoryStore::new();
        let rows: Vec<Rating> = (0..6).map(|i| Rating::new(i, 1, 3.0)).collect();
        seeded(&store, &rows);
        let config = PartitionConfig::default();
        RoundRobinPartitioner::new(&config).partition(&store, 3).unwrap();

        let router = InsertRouter::new(&store, &config);
        // Row 7 has rank 6 → partition 0
        let routed = router.round_robin_insert(Rating::new(100, 1, 4.0)).unwrap();
        assert_eq!(routed.index, 0);
        assert_eq!(store.row_count(&part("rrobin_part", 0)).unwrap(), 3);

        let routed = router.round_robin_insert(Rating::new(101, 1, 4.0)).unwrap();
        assert_eq!(routed.index, 1);
        let routed = router.round_robin_insert(Rating::new(102, 1, 4.0)).unwrap();
        assert_eq!(routed.index, 2);
    }

    #[test]
    fn test_no_partitions_rolls_back_base() {
        let store = MemoryStore::new();
        seeded(&store, &[Rating::new(1, 1, 1.0)]);
        let config = PartitionConfig::default();
        let router = InsertRouter::new(&store, &config);

        let err = router.range_insert(Rating::new(2, 2, 2.0)).unwrap_err();
        assert_eq!(err.operation(), Some("range_insert"));
        assert!(matches!(err.root(), PartError::NoPartitionsExist(p) if p == "range_part"));

        let err = router.round_robin_insert(Rating::new(2, 2, 2.0)).unwrap_err();
        assert!(matches!(err.root(), PartError::NoPartitionsExist(p) if p == "rrobin_part"));

        assert_eq!(store.scan(&base()).unwrap(), vec![Rating::new(1, 1, 1.0)]);
        assert_eq!(PartitionCatalog::new(&store).count("range_part").unwrap(), 0);
    }

    #[test]
    fn test_duplicate_key_touches_nothing() {
        let store = MemoryStore::new();
        seeded(&store, &[Rating::new(1, 1, 1.0)]);
        let config = PartitionConfig::default();
        RangePartitioner::new(&config).partition(&store, 2).unwrap();

        let err = InsertRouter::new(&store, &config)
            .range_insert(Rating::new(1, 1, 4.0))
            .unwrap_err();
        assert!(matches!(err.root(), PartError::DuplicateKey { user_id: 1, item_id: 1, .. }));
        assert_eq!(store.row_count(&part("range_part", 1)).unwrap(), 0);
        assert_eq!(store.row_count(&base()).unwrap(), 1);
    }

    #[test]
    fn test_failed_partition_write_undoes_base_write() {
        let store = MemoryStore::new();
        seeded(&store, &[]);
        let config = PartitionConfig::default();
        RangePartitioner::new(&config).partition(&store, 2).unwrap();
        // Target partition vanishes behind the catalog's back
        store.drop_relation(&part("range_part", 1)).unwrap();
        store.create_relation(&part("range_part", 7), RelationKind::Partition).unwrap();

        let err = InsertRouter::new(&store, &config)
            .range_insert(Rating::new(5, 5, 4.0))
            .unwrap_err();
        assert!(matches!(err.root(), PartError::RelationNotFound(_)));
        assert_eq!(store.row_count(&base()).unwrap(), 0);
    }

    #[test]
    fn test_out_of_domain_rating_rejected() {
        let store = MemoryStore::new();
        seeded(&store, &[]);
        let config = PartitionConfig::default();
        RangePartitioner::new(&config).partition(&store, 2).unwrap();

        let err = InsertRouter::new(&store, &config)
            .range_insert(Rating::new(1, 1, 6.0))
            .unwrap_err();
        assert!(matches!(err.root(), PartError::RatingOutOfDomain { .. }));
        assert_eq!(store.row_count(&base()).unwrap(), 0);
    }

    #[test]
    fn test_round_robin_rejects_out_of_domain_rating() {
        let store = MemoryStore::new();
        seeded(&store, &[Rating::new(1, 1, 1.0)]);
        let config = PartitionConfig::default();
        RoundRobinPartitioner::new(&config).partition(&store, 2).unwrap();

        let router = InsertRouter::new(&store, &config);
        for rating in [7.0, f64::NAN, -1.0] {
            let err = router.round_robin_insert(Rating::new(2, 2, rating)).unwrap_err();
            assert_eq!(err.operation(), Some("round_robin_insert"));
            assert!(matches!(err.root(), PartError::RatingOutOfDomain { .. }));
        }
        assert_eq!(store.row_count(&base()).unwrap(), 1);

        // The base relation still range-partitions cleanly
        RangePartitioner::new(&config).partition(&store, 3).unwrap();
    }

    #[test]
    fn test_failed_undo_reports_divergence() {
        let store = UndoFailingStore(MemoryStore::new());
        seeded(&store.0, &[]);
        let config = PartitionConfig::default();
        RangePartitioner::new(&config).partition(&store.0, 2).unwrap();
        store.0.drop_relation(&part("range_part", 1)).unwrap();
        store.0.create_relation(&part("range_part", 7), RelationKind::Partition).unwrap();

        let err = InsertRouter::new(&store, &config)
            .range_insert(Rating::new(5, 5, 4.0))
            .unwrap_err();
        assert_eq!(err.operation(), Some("range_insert"));
        match err.root() {
            PartError::RollbackFailed { source, undo } => {
                assert!(matches!(**source, PartError::RelationNotFound(_)));
                assert!(matches!(**undo, PartError::StorageUnavailable(_)));
            }
            other => panic!("unexpected error {:?}", other),
        }
        // The orphaned base row is there, and the caller was told about it
        assert_eq!(store.row_count(&base()).unwrap(), 1);
    }

    #[test]
    fn test_routing_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = PartitionConfig::default();
        {
            let store = FileStore::open(dir.path()).unwrap();
            let rows: Vec<Rating> = (0..6).map(|i| Rating::new(i, 0, i as f64 * 0.8)).collect();
            seeded(&store, &rows);
            RangePartitioner::new(&config).partition(&store, 4).unwrap();
            RoundRobinPartitioner::new(&config).partition(&store, 3).unwrap();
        }

        // New session: counts come from the directory, not from memory
        let store = FileStore::open(dir.path()).unwrap();
        let router = InsertRouter::new(&store, &config);
        assert_eq!(router.range_insert(Rating::new(50, 1, 1.5)).unwrap().index, 1);
        assert_eq!(router.round_robin_insert(Rating::new(51, 1, 2.0)).unwrap().index, 1);

        assert_eq!(store.row_count(&base()).unwrap(), 8);
        let rr: u64 = (0..3).map(|i| store.row_count(&part("rrobin_part", i)).unwrap()).sum();
        assert_eq!(rr, 7);
    }

    #[test]
    fn test_concurrent_round_robin_inserts_stay_balanced() {
        let store = std::sync::Arc::new(MemoryStore::new());
        seeded(store.as_ref(), &[]);
        let config = PartitionConfig::default();
        RoundRobinPartitioner::new(&config).partition(store.as_ref(), 4).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let config = PartitionConfig::default();
                    let router = InsertRouter::new(store.as_ref(), &config);
                    for i in 0..25 {
                        router.round_robin_insert(Rating::new(t, i, 2.0)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for i in 0..4 {
            assert_eq!(store.row_count(&part("rrobin_part", i)).unwrap(), 25);
        }
    }
}
