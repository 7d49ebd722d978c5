//! Partition Strategy - Determines how base rows are distributed across partitions
//!
//! Provides two strategies:
//! - Range partitioning: equal-width rating intervals over `[0, R_max]`
//! - Round-robin partitioning: cyclic assignment by rank in `(user_id, item_id)` order
//!
//! Both share one bulk driver ([`run_bulk`]): scan the base relation once,
//! split it into buckets, create every target relation inside a single
//! [`StoreTxn`], and write each bucket with one set-based append. Any failure
//! rolls back the relations created by that invocation, and a rollback that
//! cannot finish surfaces as [`PartError::RollbackFailed`].

pub mod range;
pub mod round_robin;

pub use range::{RangePartitioner, RatingIntervals};
pub use round_robin::RoundRobinPartitioner;

use std::fmt;
use std::time::{Duration, Instant};

use crate::config::PartitionConfig;
use crate::data::Rating;
use crate::storage::{with_relation_lock, RelationKind, RelationName, RelationStore, StoreTxn};
use crate::{PartError, Result};

/// Row count above which bucket assignment runs on the rayon pool
pub(crate) const PARALLEL_THRESHOLD: usize = 50_000;

// ============================================================================
// Strategy / Partition Count
// ============================================================================

/// Partitioning strategy; each owns a distinct name prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Range,
    RoundRobin,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Range => f.write_str("range"),
            Strategy::RoundRobin => f.write_str("round-robin"),
        }
    }
}

/// A validated, positive number of partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PartitionCount(usize);

impl PartitionCount {
    /// Rejects `n <= 0` with a configuration error
    pub fn new(n: i64) -> Result<Self> {
        if n <= 0 {
            return Err(PartError::Configuration(format!(
                "partition count must be positive, got {}",
                n
            )));
        }
        usize::try_from(n)
            .map(Self)
            .map_err(|_| PartError::Configuration(format!("partition count {} too large", n)))
    }

    /// Count as reported by the catalog; zero means no partitions exist
    pub(crate) fn from_catalog(n: usize, prefix: &str) -> Result<Self> {
        if n == 0 {
            return Err(PartError::NoPartitionsExist(prefix.to_string()));
        }
        Ok(Self(n))
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

// ============================================================================
// Bulk Driver
// ============================================================================

/// Summary of one bulk partitioning run
#[derive(Debug, Clone)]
pub struct PartitionReport {
    pub strategy: Strategy,
    pub partitions: usize,
    pub rows: u64,
    pub elapsed: Duration,
}

/// Bucket assignment shared by the bulk driver
pub(crate) trait Distribute {
    fn strategy(&self) -> Strategy;

    /// Split base rows into exactly `count` buckets, bucket `i` → partition `i`
    fn distribute(&self, rows: Vec<Rating>, count: PartitionCount) -> Result<Vec<Vec<Rating>>>;
}

/// Scan, bucket, create and fill the partitions of one strategy
pub(crate) fn run_bulk(
    store: &dyn RelationStore,
    config: &PartitionConfig,
    distributor: &dyn Distribute,
    count: PartitionCount,
) -> Result<PartitionReport> {
    let start = Instant::now();
    let strategy = distributor.strategy();
    let prefix = config.prefix(strategy);
    let base = config.base()?;

    // Freeze the base relation against routed inserts for the whole scan
    with_relation_lock(store, &base, || {
        let rows = store.scan(&base)?;
        let total = rows.len() as u64;
        let buckets = distributor.distribute(rows, count)?;
        debug_assert_eq!(buckets.len(), count.get());

        StoreTxn::run(store, |txn| {
            let mut names = Vec::with_capacity(count.get());
            for index in 0..count.get() {
                let name = RelationName::partition(prefix, index)?;
                txn.create_relation(&name, RelationKind::Partition)
                    .map_err(|e| match e {
                        PartError::RelationExists(n) => PartError::PartitionAlreadyExists(n),
                        other => other,
                    })?;
                names.push(name);
            }

            for (name, bucket) in names.iter().zip(&buckets) {
                txn.append(name, bucket)?;
                log::debug!("{}: {} rows", name, bucket.len());
            }
            Ok(())
        })?;

        let report = PartitionReport {
            strategy,
            partitions: count.get(),
            rows: total,
            elapsed: start.elapsed(),
        };
        log::info!(
            "{} partitioning of {} into {} partitions: {} rows in {:.2}s",
            strategy,
            base,
            report.partitions,
            report.rows,
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    })
}
