//! Store Transaction - undo log over a [`RelationStore`]
//!
//! Every mutation made through a [`StoreTxn`] records how to reverse it.
//! `commit()` forgets the log; `rollback()` replays it newest-first so a
//! failed operation leaves the store exactly as it found it. A rollback that
//! cannot complete is reported to the caller, never only logged.

use super::{RelationKind, RelationName, RelationStore};
use crate::data::{Rating, RowKey};
use crate::{PartError, Result};

/// A reversible action recorded by a transaction
#[derive(Debug, Clone)]
enum UndoOp {
    /// Relation created inside this transaction; undone by dropping it
    CreatedRelation(RelationName),
    /// Row inserted into a pre-existing relation; undone by removing it
    InsertedRow { relation: RelationName, key: RowKey },
}

/// Undo-logged view of a store for one logical operation
pub struct StoreTxn<'a> {
    store: &'a dyn RelationStore,
    undo_log: Vec<UndoOp>,
    finished: bool,
}

impl<'a> StoreTxn<'a> {
    pub fn begin(store: &'a dyn RelationStore) -> Self {
        Self {
            store,
            undo_log: Vec::new(),
            finished: false,
        }
    }

    /// Run `f` in a fresh transaction: commit on success, roll back on error
    ///
    /// If the rollback itself fails the returned error is
    /// [`PartError::RollbackFailed`] carrying both failures.
    pub fn run<T, F>(store: &'a dyn RelationStore, f: F) -> Result<T>
    where
        F: FnOnce(&mut StoreTxn<'a>) -> Result<T>,
    {
        let mut txn = Self::begin(store);
        match f(&mut txn) {
            Ok(value) => {
                txn.commit();
                Ok(value)
            }
            Err(e) => Err(txn.abort(e)),
        }
    }

    pub fn create_relation(&mut self, name: &RelationName, kind: RelationKind) -> Result<()> {
        self.store.create_relation(name, kind)?;
        self.undo_log.push(UndoOp::CreatedRelation(name.clone()));
        Ok(())
    }

    /// Single-row insert, undone by key
    pub fn insert(&mut self, name: &RelationName, row: Rating) -> Result<()> {
        self.store.insert(name, row)?;
        if !self.created_here(name) {
            self.undo_log.push(UndoOp::InsertedRow {
                relation: name.clone(),
                key: row.key(),
            });
        }
        Ok(())
    }

    /// Bulk append into a relation created by this transaction
    ///
    /// Rows appended to a relation created earlier in the same transaction
    /// vanish with it on rollback, so no per-row undo is kept. Appends to
    /// other relations are logged row by row.
    pub fn append(&mut self, name: &RelationName, rows: &[Rating]) -> Result<()> {
        self.store.append(name, rows)?;
        if !self.created_here(name) {
            self.undo_log.extend(rows.iter().map(|row| UndoOp::InsertedRow {
                relation: name.clone(),
                key: row.key(),
            }));
        }
        Ok(())
    }

    fn created_here(&self, name: &RelationName) -> bool {
        self.undo_log
            .iter()
            .any(|op| matches!(op, UndoOp::CreatedRelation(n) if n == name))
    }

    /// Number of undo entries pending
    pub fn pending(&self) -> usize {
        self.undo_log.len()
    }

    /// Make all changes permanent
    pub fn commit(mut self) {
        self.undo_log.clear();
        self.finished = true;
    }

    /// Reverse every recorded change; the first failed step is returned
    pub fn rollback(mut self) -> Result<()> {
        self.undo()
    }

    /// Roll back after `cause`; a failed rollback is folded into the error
    pub fn abort(self, cause: PartError) -> PartError {
        match self.rollback() {
            Ok(()) => cause,
            Err(undo) => PartError::RollbackFailed {
                source: Box::new(cause),
                undo: Box::new(undo),
            },
        }
    }

    /// Attempts every step even after a failure
    fn undo(&mut self) -> Result<()> {
        self.finished = true;
        let mut first_err = None;
        while let Some(op) = self.undo_log.pop() {
            let result = match &op {
                UndoOp::CreatedRelation(name) => self.store.drop_relation(name),
                UndoOp::InsertedRow { relation, key } => {
                    self.store.remove_row(relation, *key).map(|_| ())
                }
            };
            if let Err(e) = result {
                log::error!("Rollback step {:?} failed: {}", op, e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for StoreTxn<'_> {
    // Abandoned without commit or rollback; `undo` logs each failed step
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.undo();
        }
    }
}
