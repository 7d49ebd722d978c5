//! Range Partitioner
//!
//! `[0, R_max]` is cut into N equal-width intervals of width
//! `delta = R_max / N`:
//!
//! ```text
//! index 0       : [0, delta]
//! index i (i>0) : (i*delta, (i+1)*delta]
//! index N-1     : ((N-1)*delta, R_max]
//! ```
//!
//! [`RatingIntervals::index_of`] is the only place this rule is evaluated;
//! bulk partitioning and routed inserts both call it, so a rating sitting
//! exactly on a boundary lands in the same partition either way.

use rayon::prelude::*;

use super::{run_bulk, Distribute, PartitionCount, PartitionReport, Strategy, PARALLEL_THRESHOLD};
use crate::config::PartitionConfig;
use crate::data::Rating;
use crate::storage::RelationStore;
use crate::{OpContext, PartError, Result};

// ============================================================================
// Interval Rule
// ============================================================================

/// Equal-width rating intervals over `[0, max]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingIntervals {
    max: f64,
    count: usize,
    delta: f64,
}

impl RatingIntervals {
    pub fn new(max: f64, count: PartitionCount) -> Self {
        let count = count.get();
        Self {
            max,
            count,
            delta: max / count as f64,
        }
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Exclusive lower bound of interval `i` (inclusive for interval 0)
    #[inline]
    pub fn lower(&self, i: usize) -> f64 {
        i as f64 * self.delta
    }

    /// Inclusive upper bound of interval `i`; the last interval ends at `max`
    #[inline]
    pub fn upper(&self, i: usize) -> f64 {
        if i + 1 == self.count {
            self.max
        } else {
            (i + 1) as f64 * self.delta
        }
    }

    /// Whether `rating` falls inside interval `i`
    pub fn contains(&self, i: usize, rating: f64) -> bool {
        if i >= self.count {
            return false;
        }
        let above_lower = if i == 0 {
            rating >= 0.0
        } else {
            rating > self.lower(i)
        };
        above_lower && rating <= self.upper(i)
    }

    /// Index of the single interval containing `rating`
    pub fn index_of(&self, rating: f64) -> Result<usize> {
        // NaN fails both comparisons
        if !(rating >= 0.0 && rating <= self.max) {
            return Err(PartError::RatingOutOfDomain {
                rating,
                max: self.max,
            });
        }

        let last = self.count - 1;
        let mut i = ((rating / self.delta).ceil() as usize).saturating_sub(1).min(last);
        // Correct for rounding in the division against the exact boundaries
        while i > 0 && rating <= self.lower(i) {
            i -= 1;
        }
        while i < last && rating > self.upper(i) {
            i += 1;
        }
        Ok(i)
    }
}

// ============================================================================
// Range Partitioner
// ============================================================================

/// Splits the base relation into `range_prefix0 .. range_prefix{N-1}`
pub struct RangePartitioner<'a> {
    config: &'a PartitionConfig,
}

impl<'a> RangePartitioner<'a> {
    pub fn new(config: &'a PartitionConfig) -> Self {
        Self { config }
    }

    /// Create N range partitions and copy every base row into its interval
    pub fn partition(&self, store: &dyn RelationStore, n: i64) -> Result<PartitionReport> {
        self.run(store, n).op("range_partition")
    }

    fn run(&self, store: &dyn RelationStore, n: i64) -> Result<PartitionReport> {
        self.config.validate()?;
        let count = PartitionCount::new(n)?;
        run_bulk(store, self.config, self, count)
    }
}

impl Distribute for RangePartitioner<'_> {
    fn strategy(&self) -> Strategy {
        Strategy::Range
    }

    fn distribute(&self, rows: Vec<Rating>, count: PartitionCount) -> Result<Vec<Vec<Rating>>> {
        let intervals = RatingIntervals::new(self.config.rating_max, count);

        let indices: Vec<usize> = if rows.len() > PARALLEL_THRESHOLD {
            rows.par_iter()
                .map(|row| intervals.index_of(row.rating))
                .collect::<Result<_>>()?
        } else {
            rows.iter()
                .map(|row| intervals.index_of(row.rating))
                .collect::<Result<_>>()?
        };

        let mut buckets = vec![Vec::new(); count.get()];
        for (row, index) in rows.into_iter().zip(indices) {
            buckets[index].push(row);
        }
        Ok(buckets)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PartitionCatalog;
    use crate::storage::memory::UndoFailingStore;
    use crate::storage::{MemoryStore, RelationKind, RelationName};

    fn intervals(max: f64, n: i64) -> RatingIntervals {
        RatingIntervals::new(max, PartitionCount::new(n).unwrap())
    }

    fn seeded_store(rows: &[Rating]) -> MemoryStore {
        let store = MemoryStore::new();
        let base = RelationName::new("ratings").unwrap();
        store.create_relation(&base, RelationKind::Base).unwrap();
        store.append(&base, rows).unwrap();
        store
    }

    #[test]
    fn test_boundary_sweep_single_membership() {
        for n in 1..=12 {
            let iv = intervals(5.0, n);
            let mut points: Vec<f64> = (0..=n as usize).map(|k| k as f64 * iv.delta()).collect();
            points.extend((0..n as usize).map(|k| (k as f64 + 0.5) * iv.delta()));
            points.push(5.0);

            for r in points.into_iter().filter(|r| *r <= 5.0) {
                let members: Vec<usize> = (0..iv.count()).filter(|&i| iv.contains(i, r)).collect();
                assert_eq!(members.len(), 1, "n={} r={} members={:?}", n, r, members);
                assert_eq!(iv.index_of(r).unwrap(), members[0], "n={} r={}", n, r);
            }
        }
    }

    #[test]
    fn test_boundary_values_go_low() {
        let iv = intervals(5.0, 4); // delta = 1.25
        assert_eq!(iv.index_of(0.0).unwrap(), 0);
        assert_eq!(iv.index_of(1.25).unwrap(), 0);
        assert_eq!(iv.index_of(1.5).unwrap(), 1);
        assert_eq!(iv.index_of(2.5).unwrap(), 1);
        assert_eq!(iv.index_of(2.51).unwrap(), 2);
        assert_eq!(iv.index_of(5.0).unwrap(), 3);
    }

    #[test]
    fn test_out_of_domain() {
        let iv = intervals(5.0, 3);
        assert!(matches!(iv.index_of(-0.1), Err(PartError::RatingOutOfDomain { .. })));
        assert!(matches!(iv.index_of(5.5), Err(PartError::RatingOutOfDomain { .. })));
        assert!(iv.index_of(f64::NAN).is_err());
    }

    #[test]
    fn test_range_partition_disjoint_union() {
        let rows: Vec<Rating> = (0..200)
            .map(|i| Rating::new(i / 10, i % 10, (i % 11) as f64 * 0.5))
            .collect();
        let store = seeded_store(&rows);
        let config = PartitionConfig::default();

        let report = RangePartitioner::new(&config).partition(&store, 3).unwrap();
        assert_eq!(report.partitions, 3);
        assert_eq!(report.rows, 200);

        let iv = intervals(5.0, 3);
        let mut union = Vec::new();
        for i in 0..3 {
            let part = store.scan(&RelationName::partition("range_part", i).unwrap()).unwrap();
            assert!(part.iter().all(|r| iv.contains(i, r.rating)));
            union.extend(part);
        }
        union.sort_by_key(|r| r.key());
        let mut expected = rows.clone();
        expected.sort_by_key(|r| r.key());
        assert_eq!(union, expected);

        // Base relation untouched
        assert_eq!(store.row_count(&RelationName::new("ratings").unwrap()).unwrap(), 200);
    }

    #[test]
    fn test_large_input_takes_parallel_path() {
        let rows: Vec<Rating> = (0..(PARALLEL_THRESHOLD as i64 + 10))
            .map(|i| Rating::new(i, 0, (i % 51) as f64 / 10.0))
            .collect();
        let store = seeded_store(&rows);
        let config = PartitionConfig::default();

        RangePartitioner::new(&config).partition(&store, 5).unwrap();
        let total: u64 = (0..5)
            .map(|i| store.row_count(&RelationName::partition("range_part", i).unwrap()).unwrap())
            .sum();
        assert_eq!(total, rows.len() as u64);
    }

    #[test]
    fn test_collision_rolls_back_whole_run() {
        let store = seeded_store(&[Rating::new(1, 1, 1.0), Rating::new(2, 2, 4.0)]);
        // Pre-existing relation from an earlier run collides on the second iteration
        let existing = RelationName::partition("range_part", 1).unwrap();
        store.create_relation(&existing, RelationKind::Partition).unwrap();
        store.insert(&existing, Rating::new(9, 9, 2.0)).unwrap();

        let config = PartitionConfig::default();
        let err = RangePartitioner::new(&config).partition(&store, 3).unwrap_err();
        assert_eq!(err.operation(), Some("range_partition"));
        assert!(matches!(err.root(), PartError::PartitionAlreadyExists(n) if n == "range_part1"));

        let zero = RelationName::partition("range_part", 0).unwrap();
        assert!(!store.relation_exists(&zero).unwrap());
        assert_eq!(store.scan(&existing).unwrap(), vec![Rating::new(9, 9, 2.0)]);
        assert_eq!(PartitionCatalog::new(&store).count("range_part").unwrap(), 1);
    }

    #[test]
    fn test_collision_with_failed_undo_reports_rollback_failure() {
        let store = UndoFailingStore(seeded_store(&[Rating::new(1, 1, 1.0)]));
        let existing = RelationName::partition("range_part", 1).unwrap();
        store.create_relation(&existing, RelationKind::Partition).unwrap();

        let config = PartitionConfig::default();
        let err = RangePartitioner::new(&config).partition(&store, 2).unwrap_err();
        assert_eq!(err.operation(), Some("range_partition"));
        match err.root() {
            PartError::RollbackFailed { source, undo } => {
                assert!(matches!(&**source, PartError::PartitionAlreadyExists(n) if n == "range_part1"));
                assert!(matches!(**undo, PartError::StorageUnavailable(_)));
            }
            other => panic!("unexpected error {:?}", other),
        }
        // range_part0 could not be dropped and is still visible
        assert_eq!(PartitionCatalog::new(&store).count("range_part").unwrap(), 2);
    }

    #[test]
    fn test_rerun_raises_already_exists() {
        let store = seeded_store(&[Rating::new(1, 1, 1.0)]);
        let config = PartitionConfig::default();
        RangePartitioner::new(&config).partition(&store, 2).unwrap();

        let err = RangePartitioner::new(&config).partition(&store, 2).unwrap_err();
        assert!(matches!(err.root(), PartError::PartitionAlreadyExists(n) if n == "range_part0"));
        assert_eq!(PartitionCatalog::new(&store).count("range_part").unwrap(), 2);
    }

    #[test]
    fn test_invalid_count_and_out_of_domain_rows() {
        let store = seeded_store(&[Rating::new(1, 1, 7.0)]);
        let config = PartitionConfig::default();

        let err = RangePartitioner::new(&config).partition(&store, 0).unwrap_err();
        assert!(matches!(err.root(), PartError::Configuration(_)));

        let err = RangePartitioner::new(&config).partition(&store, 2).unwrap_err();
        assert!(matches!(err.root(), PartError::RatingOutOfDomain { .. }));
        assert_eq!(PartitionCatalog::new(&store).count("range_part").unwrap(), 0);
    }
}
