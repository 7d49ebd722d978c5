//! Rating row definition

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Encoded size of one row: user (i64) + item (i64) + rating (f64)
pub const RECORD_SIZE: usize = 24;

/// Identity of a row in the base relation
pub type RowKey = (i64, i64);

/// One (user, item, rating) fact
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rating {
    pub user_id: i64,
    pub item_id: i64,
    pub rating: f64,
}

impl Rating {
    pub fn new(user_id: i64, item_id: i64, rating: f64) -> Self {
        Self { user_id, item_id, rating }
    }

    /// Uniqueness key in the base relation
    #[inline]
    pub fn key(&self) -> RowKey {
        (self.user_id, self.item_id)
    }

    /// Write the fixed-size little-endian record
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_i64::<LittleEndian>(self.user_id)?;
        w.write_i64::<LittleEndian>(self.item_id)?;
        w.write_f64::<LittleEndian>(self.rating)
    }

    /// Read one fixed-size record
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let user_id = r.read_i64::<LittleEndian>()?;
        let item_id = r.read_i64::<LittleEndian>()?;
        let rating = r.read_f64::<LittleEndian>()?;
        Ok(Self { user_id, item_id, rating })
    }
}
