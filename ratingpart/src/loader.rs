//! Bulk loader for `::`-delimited rating files
//!
//! Input lines look like `user::item::rating::timestamp`. Fields past the
//! rating are ignored and blank lines are skipped. The base relation is
//! created and filled in one set-based append, and removed again if anything
//! fails.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Instant;

use crate::config::PartitionConfig;
use crate::data::Rating;
use crate::storage::{with_relation_lock, RelationKind, RelationStore, StoreTxn};
use crate::{OpContext, PartError, Result};

const FIELD_SEPARATOR: &str = "::";

/// Parse one input line; `None` for blank lines
pub fn parse_line(line: &str, line_no: usize) -> Result<Option<Rating>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let mut fields = line.split(FIELD_SEPARATOR);
    let mut next = |what: &str| {
        fields.next().map(str::trim).ok_or_else(|| PartError::Parse {
            line: line_no,
            reason: format!("missing {}", what),
        })
    };
    let user = next("user id")?;
    let item = next("item id")?;
    let rating = next("rating")?;

    let parse_err = |what: &str, value: &str| PartError::Parse {
        line: line_no,
        reason: format!("invalid {} {:?}", what, value),
    };
    Ok(Some(Rating {
        user_id: user.parse().map_err(|_| parse_err("user id", user))?,
        item_id: item.parse().map_err(|_| parse_err("item id", item))?,
        rating: rating.parse().map_err(|_| parse_err("rating", rating))?,
    }))
}

/// Create the base relation and fill it from `reader`; returns rows loaded
pub fn load_ratings<R: BufRead>(
    store: &dyn RelationStore,
    config: &PartitionConfig,
    reader: R,
) -> Result<u64> {
    load(store, config, reader).op("load_ratings")
}

/// [`load_ratings`] from a file path
pub fn load_ratings_file(
    store: &dyn RelationStore,
    config: &PartitionConfig,
    path: &Path,
) -> Result<u64> {
    let file = File::open(path)
        .map_err(PartError::from)
        .op("load_ratings")?;
    load_ratings(store, config, BufReader::new(file))
}

fn load<R: BufRead>(store: &dyn RelationStore, config: &PartitionConfig, reader: R) -> Result<u64> {
    let start = Instant::now();
    config.validate()?;
    let base = config.base()?;

    let mut rows = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        if let Some(row) = parse_line(&line?, i + 1)? {
            config.check_rating(row.rating).map_err(|e| PartError::Parse {
                line: i + 1,
                reason: e.to_string(),
            })?;
            rows.push(row);
        }
    }

    with_relation_lock(store, &base, || {
        StoreTxn::run(store, |txn| {
            txn.create_relation(&base, RelationKind::Base)?;
            txn.append(&base, &rows)
        })
    })?;

    log::info!(
        "Loaded {} rows into {} in {:.2}s",
        rows.len(),
        base,
        start.elapsed().as_secs_f64()
    );
    Ok(rows.len() as u64)
}
