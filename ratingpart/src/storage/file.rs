//! Directory-backed relation store
//!
//! Layout:
//! ```text
//! data_dir/
//! ├── ratings.rel        # 64-byte header + 24-byte records
//! ├── ratings.lock       # sidecar for cross-process write locks
//! ├── range_part0.rel
//! └── rrobin_part0.rel
//! ```
//!
//! The catalog is the directory listing itself, so relations created by an
//! earlier process are visible to a new one without any extra metadata.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;

use super::header::{RelationHeader, HEADER_SIZE};
use super::{RelationKind, RelationName, RelationStore};
use crate::data::{Rating, RowKey, RECORD_SIZE};
use crate::{PartError, Result};

const RELATION_EXT: &str = "rel";
const LOCK_EXT: &str = "lock";

/// Unique-key set of a base relation, valid while the file length matches
struct KeyCache {
    file_len: u64,
    keys: AHashSet<RowKey>,
}

/// Relation store persisting each relation as one file in a directory
pub struct FileStore {
    base_dir: PathBuf,
    /// fsync after every mutating write
    sync_writes: bool,
    key_cache: Mutex<AHashMap<String, KeyCache>>,
    /// Serializes file mutations within this process
    io_lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `base_dir`
    pub fn open(base_dir: &Path) -> Result<Self> {
        fs::create_dir_all(base_dir).map_err(|e| {
            PartError::StorageUnavailable(format!("{}: {}", base_dir.display(), e))
        })?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            sync_writes: false,
            key_cache: Mutex::new(AHashMap::new()),
            io_lock: Mutex::new(()),
        })
    }

    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    fn relation_path(&self, name: &RelationName) -> PathBuf {
        self.base_dir.join(format!("{}.{}", name, RELATION_EXT))
    }

    fn open_relation(&self, name: &RelationName, write: bool) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(write)
            .open(self.relation_path(name))
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => PartError::RelationNotFound(name.to_string()),
                _ => PartError::Io(e),
            })
    }

    fn read_header(file: &mut File, name: &RelationName) -> Result<RelationHeader> {
        let mut buf = [0u8; HEADER_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buf).map_err(|_| {
            PartError::InvalidFileFormat(format!("{}: truncated header", name))
        })?;
        RelationHeader::from_bytes(&buf, name.as_str())
    }

    fn record_count(file_len: u64, name: &RelationName) -> Result<u64> {
        let body = file_len
            .checked_sub(HEADER_SIZE as u64)
            .ok_or_else(|| PartError::InvalidFileFormat(format!("{}: truncated header", name)))?;
        if body % RECORD_SIZE as u64 != 0 {
            return Err(PartError::InvalidFileFormat(format!(
                "{}: partial record at end of file",
                name
            )));
        }
        Ok(body / RECORD_SIZE as u64)
    }

    fn read_records(file: &mut File, name: &RelationName) -> Result<Vec<Rating>> {
        let file_len = file.metadata()?.len();
        let count = Self::record_count(file_len, name)? as usize;

        let mut body = Vec::with_capacity(count * RECORD_SIZE);
        file.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        file.read_to_end(&mut body)?;

        let mut cursor = Cursor::new(body);
        let mut rows = Vec::with_capacity(count);
        for _ in 0..count {
            rows.push(Rating::read_from(&mut cursor)?);
        }
        Ok(rows)
    }

    /// Check a batch against the base relation's keys, loading them if stale
    fn check_unique(
        &self,
        file: &mut File,
        name: &RelationName,
        file_len: u64,
        rows: &[Rating],
    ) -> Result<AHashSet<RowKey>> {
        let mut cache = self.key_cache.lock();
        let entry = cache.entry(name.to_string()).or_insert_with(|| KeyCache {
            file_len: u64::MAX,
            keys: AHashSet::new(),
        });
        if entry.file_len != file_len {
            entry.keys = Self::read_records(file, name)?.iter().map(Rating::key).collect();
            entry.file_len = file_len;
        }
        let existing = &entry.keys;

        let mut batch = AHashSet::with_capacity(rows.len());
        for row in rows {
            let key = row.key();
            if existing.contains(&key) || !batch.insert(key) {
                return Err(PartError::DuplicateKey {
                    relation: name.to_string(),
                    user_id: key.0,
                    item_id: key.1,
                });
            }
        }
        Ok(batch)
    }

    /// Truncate back to `file_len` after a failed append
    ///
    /// A truncate that fails too leaves a torn tail, so both errors are
    /// reported together.
    fn discard_partial_write(file: &File, file_len: u64, write_err: io::Error) -> PartError {
        match file.set_len(file_len) {
            Ok(()) => PartError::Io(write_err),
            Err(trunc_err) => PartError::Io(io::Error::new(
                write_err.kind(),
                format!(
                    "{}; truncating back to {} bytes also failed: {}",
                    write_err, file_len, trunc_err
                ),
            )),
        }
    }

    fn write_records(&self, file: &mut File, rows: &[Rating]) -> io::Result<()> {
        file.seek(SeekFrom::End(0))?;
        let mut writer = BufWriter::with_capacity(64 * 1024, &mut *file);
        for row in rows {
            row.write_to(&mut writer)?;
        }
        writer.flush()?;
        drop(writer);
        if self.sync_writes {
            file.sync_data()?;
        }
        Ok(())
    }
}

impl RelationStore for FileStore {
    fn list_relations(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.base_dir).map_err(|e| {
            PartError::StorageUnavailable(format!("{}: {}", self.base_dir.display(), e))
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                PartError::StorageUnavailable(format!("{}: {}", self.base_dir.display(), e))
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RELATION_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if stem.starts_with(prefix) && RelationName::new(stem).is_ok() {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn relation_exists(&self, name: &RelationName) -> Result<bool> {
        Ok(self.relation_path(name).is_file())
    }

    fn create_relation(&self, name: &RelationName, kind: RelationKind) -> Result<()> {
        let _guard = self.io_lock.lock();
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.relation_path(name))
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => PartError::RelationExists(name.to_string()),
                _ => PartError::Io(e),
            })?;
        file.write_all(&RelationHeader::new(kind).to_bytes())?;
        if self.sync_writes {
            file.sync_all()?;
        }
        self.key_cache.lock().remove(name.as_str());
        log::debug!("Created relation {} ({:?})", name, kind);
        Ok(())
    }

    fn drop_relation(&self, name: &RelationName) -> Result<()> {
        let _guard = self.io_lock.lock();
        fs::remove_file(self.relation_path(name)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => PartError::RelationNotFound(name.to_string()),
            _ => PartError::Io(e),
        })?;
        // The .lock sidecar stays: another writer may hold a flock on it
        self.key_cache.lock().remove(name.as_str());
        log::debug!("Dropped relation {}", name);
        Ok(())
    }

    fn scan(&self, name: &RelationName) -> Result<Vec<Rating>> {
        let mut file = self.open_relation(name, false)?;
        Self::read_header(&mut file, name)?;
        Self::read_records(&mut file, name)
    }

    fn append(&self, name: &RelationName, rows: &[Rating]) -> Result<()> {
        let _guard = self.io_lock.lock();
        let mut file = self.open_relation(name, true)?;
        let header = Self::read_header(&mut file, name)?;
        let file_len = file.metadata()?.len();
        Self::record_count(file_len, name)?;

        let new_keys = if header.kind().enforces_unique_key() {
            Some(self.check_unique(&mut file, name, file_len, rows)?)
        } else {
            None
        };

        if let Err(e) = self.write_records(&mut file, rows) {
            self.key_cache.lock().remove(name.as_str());
            return Err(Self::discard_partial_write(&file, file_len, e));
        }

        if let Some(new_keys) = new_keys {
            let new_len = file_len + (rows.len() * RECORD_SIZE) as u64;
            if let Some(cache) = self.key_cache.lock().get_mut(name.as_str()) {
                cache.keys.extend(new_keys);
                cache.file_len = new_len;
            }
        }
        Ok(())
    }

    fn remove_row(&self, name: &RelationName, key: RowKey) -> Result<bool> {
        let _guard = self.io_lock.lock();
        let mut file = self.open_relation(name, true)?;
        let header = Self::read_header(&mut file, name)?;
        let mut rows = Self::read_records(&mut file, name)?;

        let pos = match rows.iter().rposition(|r| r.key() == key) {
            Some(pos) => pos,
            None => return Ok(false),
        };

        if pos + 1 == rows.len() {
            file.set_len((HEADER_SIZE + pos * RECORD_SIZE) as u64)?;
            if self.sync_writes {
                file.sync_all()?;
            }
        } else {
            rows.remove(pos);
            let tmp_path = self.base_dir.join(format!("{}.{}.tmp", name, RELATION_EXT));
            {
                let mut tmp = File::create(&tmp_path)?;
                tmp.write_all(&header.to_bytes())?;
                self.write_records(&mut tmp, &rows)?;
                tmp.sync_all()?;
            }
            drop(file);
            fs::rename(&tmp_path, self.relation_path(name))?;
        }
        self.key_cache.lock().remove(name.as_str());
        Ok(true)
    }

    fn row_count(&self, name: &RelationName) -> Result<u64> {
        let file = self.open_relation(name, false)?;
        Self::record_count(file.metadata()?.len(), name)
    }

    fn lock_file(&self, name: &RelationName) -> Option<PathBuf> {
        Some(self.base_dir.join(format!("{}.{}", name, LOCK_EXT)))
    }

    fn lock_key(&self, name: &RelationName) -> String {
        let dir = self
            .base_dir
            .canonicalize()
            .unwrap_or_else(|_| self.base_dir.clone());
        format!("file:{}:{}", dir.display(), name)
    }
}
