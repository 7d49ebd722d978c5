//! Partitioning configuration
//!
//! Relation names, column names and the rating domain are passed to every
//! component through [`PartitionConfig`] rather than read from globals.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::partition::Strategy;
use crate::storage::RelationName;
use crate::{PartError, Result};

/// Immutable configuration shared by catalog, partitioners and router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Unpartitioned base relation
    pub base_relation: String,
    /// Name prefix of range partitions
    pub range_prefix: String,
    /// Name prefix of round-robin partitions
    pub round_robin_prefix: String,
    pub user_column: String,
    pub item_column: String,
    pub rating_column: String,
    /// Upper bound of the rating domain `[0, rating_max]`
    pub rating_max: f64,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            base_relation: "ratings".to_string(),
            range_prefix: "range_part".to_string(),
            round_robin_prefix: "rrobin_part".to_string(),
            user_column: "userid".to_string(),
            item_column: "movieid".to_string(),
            rating_column: "rating".to_string(),
            rating_max: 5.0,
        }
    }
}

impl PartitionConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let config: PartitionConfig = serde_json::from_str(&data)
            .map_err(|e| PartError::Configuration(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check identifiers and the rating domain
    pub fn validate(&self) -> Result<()> {
        for ident in [
            &self.base_relation,
            &self.range_prefix,
            &self.round_robin_prefix,
            &self.user_column,
            &self.item_column,
            &self.rating_column,
        ] {
            RelationName::new(ident)
                .map_err(|_| PartError::Configuration(format!("invalid identifier {:?}", ident)))?;
        }
        if self.range_prefix == self.round_robin_prefix {
            return Err(PartError::Configuration(
                "range and round-robin prefixes must differ".to_string(),
            ));
        }
        if !self.rating_max.is_finite() || self.rating_max <= 0.0 {
            return Err(PartError::Configuration(format!(
                "rating_max must be a positive finite number, got {}",
                self.rating_max
            )));
        }
        Ok(())
    }

    /// Reject ratings outside `[0, rating_max]`, NaN included
    pub fn check_rating(&self, rating: f64) -> Result<()> {
        if rating >= 0.0 && rating <= self.rating_max {
            Ok(())
        } else {
            Err(PartError::RatingOutOfDomain {
                rating,
                max: self.rating_max,
            })
        }
    }

    /// Validated base relation name
    pub fn base(&self) -> Result<RelationName> {
        RelationName::new(&self.base_relation)
    }

    /// Name prefix used by a strategy
    pub fn prefix(&self, strategy: Strategy) -> &str {
        match strategy {
            Strategy::Range => &self.range_prefix,
            Strategy::RoundRobin => &self.round_robin_prefix,
        }
    }
}
