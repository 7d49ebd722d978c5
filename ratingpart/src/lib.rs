//! RatingPart Partitioning Engine
//!
//! Splits a (user, item, rating) fact table into range and round-robin
//! partitions and routes single-row inserts to the partition that the
//! bulk layout would have chosen for them.

pub mod config;
pub mod data;
pub mod storage;
pub mod catalog;
pub mod partition;
pub mod router;
pub mod loader;

// Re-export main types
pub use config::PartitionConfig;
pub use data::{Rating, RowKey};
pub use storage::{FileStore, MemoryStore, RelationKind, RelationName, RelationStore};
pub use catalog::{drop_partitions, PartitionCatalog};
pub use partition::{
    PartitionCount, PartitionReport, RangePartitioner, RatingIntervals, RoundRobinPartitioner,
    Strategy,
};
pub use router::{InsertRouter, RoutedInsert};
pub use loader::{load_ratings, load_ratings_file};

/// Partitioning engine error type
#[derive(Debug, thiserror::Error)]
pub enum PartError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Partition already exists: {0}")]
    PartitionAlreadyExists(String),

    #[error("No partitions exist for prefix '{0}'")]
    NoPartitionsExist(String),

    #[error("Duplicate key ({user_id}, {item_id}) in relation {relation}")]
    DuplicateKey {
        relation: String,
        user_id: i64,
        item_id: i64,
    },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Relation already exists: {0}")]
    RelationExists(String),

    #[error("Relation not found: {0}")]
    RelationNotFound(String),

    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Rating {rating} outside domain [0, {max}]")]
    RatingOutOfDomain { rating: f64, max: f64 },

    #[error("Invalid relation file format: {0}")]
    InvalidFileFormat(String),

    #[error("Checksum mismatch in {0}")]
    ChecksumMismatch(String),

    #[error("Parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    /// The operation failed and undoing its partial writes failed too
    #[error("{source}; rollback failed, relations may disagree: {undo}")]
    RollbackFailed {
        #[source]
        source: Box<PartError>,
        undo: Box<PartError>,
    },

    #[error("{op} failed: {source}")]
    Op {
        op: &'static str,
        #[source]
        source: Box<PartError>,
    },
}

impl PartError {
    /// Underlying error with all operation context stripped
    ///
    /// A failed rollback is itself the root: the store is no longer
    /// consistent, whatever the original failure was.
    pub fn root(&self) -> &PartError {
        match self {
            PartError::Op { source, .. } => source.root(),
            other => other,
        }
    }

    /// Name of the outermost operation that failed, if recorded
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            PartError::Op { op, .. } => Some(op),
            _ => None,
        }
    }
}

/// Attach the failing operation's name to an error
pub trait OpContext<T> {
    fn op(self, op: &'static str) -> Result<T>;
}

impl<T> OpContext<T> for Result<T> {
    fn op(self, op: &'static str) -> Result<T> {
        self.map_err(|e| PartError::Op {
            op,
            source: Box::new(e),
        })
    }
}

pub type Result<T> = std::result::Result<T, PartError>;
