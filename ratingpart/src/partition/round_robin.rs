//! Round-Robin Partitioner
//!
//! Rows are ranked by `(user_id, item_id)` ascending and the row with rank `r`
//! goes to partition `r mod N`, independent of its rating. Routed inserts
//! continue the cycle from the base relation's row count (see
//! [`RoundRobinPartitioner::index_for_rank`]).

use rayon::prelude::*;

use super::{run_bulk, Distribute, PartitionCount, PartitionReport, Strategy, PARALLEL_THRESHOLD};
use crate::config::PartitionConfig;
use crate::data::Rating;
use crate::storage::RelationStore;
use crate::{OpContext, Result};

/// Distributes the base relation cyclically into `rrobin_prefix0 ..`
pub struct RoundRobinPartitioner<'a> {
    config: &'a PartitionConfig,
}

impl<'a> RoundRobinPartitioner<'a> {
    pub fn new(config: &'a PartitionConfig) -> Self {
        Self { config }
    }

    /// Create N round-robin partitions and deal every base row into one
    pub fn partition(&self, store: &dyn RelationStore, n: i64) -> Result<PartitionReport> {
        self.run(store, n).op("round_robin_partition")
    }

    fn run(&self, store: &dyn RelationStore, n: i64) -> Result<PartitionReport> {
        self.config.validate()?;
        let count = PartitionCount::new(n)?;
        run_bulk(store, self.config, self, count)
    }

    /// Partition for the row holding zero-based `rank`
    #[inline]
    pub fn index_for_rank(rank: u64, count: PartitionCount) -> usize {
        (rank % count.get() as u64) as usize
    }
}

impl Distribute for RoundRobinPartitioner<'_> {
    fn strategy(&self) -> Strategy {
        Strategy::RoundRobin
    }

    fn distribute(&self, mut rows: Vec<Rating>, count: PartitionCount) -> Result<Vec<Vec<Rating>>> {
        if rows.len() > PARALLEL_THRESHOLD {
            rows.par_sort_by_key(Rating::key);
        } else {
            rows.sort_by_key(Rating::key);
        }

        let n = count.get();
        let mut buckets: Vec<Vec<Rating>> = (0..n)
            .map(|_| Vec::with_capacity(rows.len() / n + 1))
            .collect();
        for (rank, row) in rows.into_iter().enumerate() {
            buckets[Self::index_for_rank(rank as u64, count)].push(row);
        }
        Ok(buckets)
    }
}
