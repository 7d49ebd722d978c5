//! Validated relation identifiers
//!
//! Relation names are only ever built from a checked identifier or from a
//! checked prefix plus a non-negative index, so nothing caller-supplied is
//! spliced into a storage path or statement unvalidated.

use std::fmt;

use crate::{PartError, Result};

/// Longest identifier accepted (PostgreSQL's NAMEDATALEN - 1)
pub const MAX_IDENT_LEN: usize = 63;

/// A relation name matching `[A-Za-z_][A-Za-z0-9_]*`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationName(String);

impl RelationName {
    pub fn new(name: &str) -> Result<Self> {
        if !is_valid_ident(name) {
            return Err(PartError::InvalidIdentifier(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    /// `<prefix><index>`, e.g. `range_part` + 0 → `range_part0`
    pub fn partition(prefix: &str, index: usize) -> Result<Self> {
        if !is_valid_ident(prefix) {
            return Err(PartError::InvalidIdentifier(prefix.to_string()));
        }
        Self::new(&format!("{}{}", prefix, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Partition index if this name is `prefix` followed by a decimal index
    pub fn partition_index(name: &str, prefix: &str) -> Option<usize> {
        let digits = name.strip_prefix(prefix)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        // "01" is not a name any partitioner produces
        if digits.len() > 1 && digits.starts_with('0') {
            return None;
        }
        digits.parse().ok()
    }
}

impl fmt::Display for RelationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RelationName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_valid_ident(s: &str) -> bool {
    let mut bytes = s.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_alphabetic() || b == b'_' => {}
        _ => return false,
    }
    s.len() <= MAX_IDENT_LEN && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}
