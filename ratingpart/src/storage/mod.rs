//! Storage module - relation store contract and implementations
//!
//! The partitioning engine never talks to a concrete database. It needs a
//! store that can create, scan, append to and introspect named relations;
//! [`RelationStore`] is that contract.
//!
//! Architecture:
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  RelationStore (trait)                                   │
//! │  - create / drop / list relations by prefix              │
//! │  - bulk append, single insert, scan, row count           │
//! ├───────────────────────────┬──────────────────────────────┤
//! │  MemoryStore              │  FileStore                   │
//! │  - in-process maps        │  - one .rel file / relation  │
//! │                           │  - survives restarts         │
//! ├───────────────────────────┴──────────────────────────────┤
//! │  StoreTxn      - undo log, rollback on failure / drop    │
//! │  with_relation_lock - per-relation writer serialization  │
//! │  RelationName  - validated identifiers                   │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod ident;
pub mod header;
pub mod memory;
pub mod file;
pub mod txn;
pub mod lock;

pub use ident::RelationName;
pub use header::RelationHeader;
pub use memory::MemoryStore;
pub use file::FileStore;
pub use txn::StoreTxn;
pub use lock::with_relation_lock;

use std::path::PathBuf;

use crate::data::{Rating, RowKey};
use crate::Result;

/// Role of a relation, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// Unpartitioned base relation; (user_id, item_id) is unique
    Base,
    /// Partition; uniqueness is not enforced
    Partition,
}

impl RelationKind {
    #[inline]
    pub fn enforces_unique_key(self) -> bool {
        matches!(self, RelationKind::Base)
    }
}

/// Storage collaborator used by the catalog, partitioners and router
pub trait RelationStore: Send + Sync {
    /// Names of all relations starting with `prefix`, sorted
    fn list_relations(&self, prefix: &str) -> Result<Vec<String>>;

    fn relation_exists(&self, name: &RelationName) -> Result<bool>;

    /// Create an empty relation; fails with `RelationExists` if taken
    fn create_relation(&self, name: &RelationName, kind: RelationKind) -> Result<()>;

    fn drop_relation(&self, name: &RelationName) -> Result<()>;

    /// All rows in stored (append) order
    fn scan(&self, name: &RelationName) -> Result<Vec<Rating>>;

    /// Append rows in one write. Either every row is stored or none is.
    fn append(&self, name: &RelationName, rows: &[Rating]) -> Result<()>;

    /// Single-row insert
    fn insert(&self, name: &RelationName, row: Rating) -> Result<()> {
        self.append(name, std::slice::from_ref(&row))
    }

    /// Remove the most recently appended row with `key`; returns whether one was found
    fn remove_row(&self, name: &RelationName, key: RowKey) -> Result<bool>;

    fn row_count(&self, name: &RelationName) -> Result<u64>;

    /// Sidecar file used for cross-process write locking, if the store has one
    fn lock_file(&self, _name: &RelationName) -> Option<PathBuf> {
        None
    }

    /// Key identifying `name` in the process-wide lock registry
    fn lock_key(&self, name: &RelationName) -> String;
}
