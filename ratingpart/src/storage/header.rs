//! Relation file header definition

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

use super::RelationKind;
use crate::{PartError, Result};

/// Magic bytes at the start of every relation file
pub const MAGIC: &[u8; 8] = b"RPARTREL";
pub const VERSION_MAJOR: u16 = 1;
pub const VERSION_MINOR: u16 = 0;
/// Records start right after the header
pub const HEADER_SIZE: usize = 64;

const FLAG_UNIQUE_KEY: u32 = 0x1;

/// Relation file header (64 bytes)
#[derive(Debug, Clone)]
pub struct RelationHeader {
    /// Magic bytes "RPARTREL"
    pub magic: [u8; 8],
    pub version_major: u16,
    pub version_minor: u16,
    /// Bit 0: (user_id, item_id) uniqueness enforced
    pub flags: u32,
    /// Creation timestamp (Unix timestamp)
    pub created_at: i64,
    /// Header checksum
    pub checksum: u32,
}

impl RelationHeader {
    /// Create a new header for a relation of the given kind
    pub fn new(kind: RelationKind) -> Self {
        let flags = if kind.enforces_unique_key() { FLAG_UNIQUE_KEY } else { 0 };
        Self {
            magic: *MAGIC,
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            flags,
            created_at: chrono::Utc::now().timestamp(),
            checksum: 0,
        }
    }

    pub fn kind(&self) -> RelationKind {
        if self.flags & FLAG_UNIQUE_KEY != 0 {
            RelationKind::Base
        } else {
            RelationKind::Partition
        }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);

        buf.extend_from_slice(&self.magic);
        buf.extend_from_slice(&self.version_major.to_le_bytes());
        buf.extend_from_slice(&self.version_minor.to_le_bytes());
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf.extend_from_slice(&self.created_at.to_le_bytes());

        // CRC32 of all previous bytes
        let checksum = crc32fast::hash(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());

        buf.resize(HEADER_SIZE, 0);
        buf
    }

    /// Deserialize from bytes; `relation` only labels errors
    pub fn from_bytes(bytes: &[u8], relation: &str) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(PartError::InvalidFileFormat(format!("{}: truncated header", relation)));
        }

        let mut cursor = Cursor::new(bytes);

        let mut magic = [0u8; 8];
        cursor.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(PartError::InvalidFileFormat(format!("{}: bad magic", relation)));
        }

        let version_major = cursor.read_u16::<LittleEndian>()?;
        let version_minor = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u32::<LittleEndian>()?;
        let created_at = cursor.read_i64::<LittleEndian>()?;
        let checksum = cursor.read_u32::<LittleEndian>()?;

        let header_data = &bytes[..cursor.position() as usize - 4];
        if crc32fast::hash(header_data) != checksum {
            return Err(PartError::ChecksumMismatch(relation.to_string()));
        }

        if version_major > VERSION_MAJOR {
            return Err(PartError::InvalidFileFormat(format!(
                "{}: unsupported version {}.{}",
                relation, version_major, version_minor
            )));
        }

        Ok(Self {
            magic,
            version_major,
            version_minor,
            flags,
            created_at,
            checksum,
        })
    }
}
