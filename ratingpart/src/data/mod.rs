//! Row types

mod row;

pub use row::{Rating, RowKey, RECORD_SIZE};
