//! Append-only object index.
//!
//! Maps object keys to OIDs. The key of an object is its 1-based position
//! in the file, so lookups are a single offset computation into a memory
//! mapping.
//!
//! ```text
//! +---------------------------+  0
//! | header (4096 bytes)       |
//! +---------------------------+  4096
//! | page 0: 128 × 32-byte OID |
//! +---------------------------+  8192
//! | page 1 ...                |
//! +---------------------------+
//! ```
//!
//! Header fields (little-endian): magic (8) | CRC-64 of bytes 16..4096 (8) |
//! created ns (8) | updated ns (8) | page count (8) | object count (8) |
//! reserved zeros.
//!
//! Writers hold an exclusive advisory lock on the file for the lifetime of
//! the handle. The file grows one page at a time and is remapped after each
//! extension.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use gart_core::digest::{crc64, object_index_magic};
use gart_core::Oid;
use memmap2::{Mmap, MmapMut};

use crate::error::{Error, Result};
use crate::fs::{create_options, now_nanos};

pub const HEADER_SIZE: usize = 4096;
pub const PAGE_SIZE: usize = 4096;
pub const RECORD_SIZE: usize = 32;
pub const RECORDS_PER_PAGE: u64 = (PAGE_SIZE / RECORD_SIZE) as u64;

/// Access mode for index files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    created: i64,
    updated: i64,
    pcnt: u64,
    ocnt: u64,
}

impl Header {
    fn fresh() -> Self {
        let now = now_nanos();
        Self {
            created: now,
            updated: now,
            pcnt: 0,
            ocnt: 0,
        }
    }

    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&object_index_magic());
        buf[16..24].copy_from_slice(&self.created.to_le_bytes());
        buf[24..32].copy_from_slice(&self.updated.to_le_bytes());
        buf[32..40].copy_from_slice(&self.pcnt.to_le_bytes());
        buf[40..48].copy_from_slice(&self.ocnt.to_le_bytes());
        let crc = crc64(&buf[16..]);
        buf[8..16].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    fn decode(path: &Path, buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::corrupt(path, "short header"));
        }
        if buf[0..8] != object_index_magic() {
            return Err(Error::corrupt(path, "bad magic"));
        }
        let stored = read_u64(buf, 8);
        if stored != crc64(&buf[16..HEADER_SIZE]) {
            return Err(Error::corrupt(path, "header checksum mismatch"));
        }
        Ok(Self {
            created: read_u64(buf, 16) as i64,
            updated: read_u64(buf, 24) as i64,
            pcnt: read_u64(buf, 32),
            ocnt: read_u64(buf, 40),
        })
    }
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(b)
}

enum Mapping {
    Read(Mmap),
    Write(MmapMut),
}

impl Mapping {
    fn bytes(&self) -> &[u8] {
        match self {
            Mapping::Read(m) => m,
            Mapping::Write(m) => m,
        }
    }
}

/// Open handle on the object index file.
pub struct ObjectIndex {
    path: PathBuf,
    file: File,
    mode: Mode,
    map: Option<Mapping>,
    header: Header,
    modified: bool,
    closed: bool,
}

impl std::fmt::Debug for ObjectIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectIndex")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("ocnt", &self.header.ocnt)
            .field("pcnt", &self.header.pcnt)
            .finish()
    }
}

impl ObjectIndex {
    /// Write an empty index (header only) at `path`.
    pub fn create(path: &Path) -> Result<()> {
        if path.exists() {
            return Err(Error::AlreadyExists(format!(
                "object index {}",
                path.display()
            )));
        }
        let mut file = create_options().open(path)?;
        file.write_all(&Header::fresh().encode())?;
        file.sync_all()?;
        tracing::debug!(path = %path.display(), "created object index");
        Ok(())
    }

    /// Map and verify an existing index.
    pub fn open(path: &Path, mode: Mode) -> Result<Self> {
        let file = match mode {
            Mode::Read => OpenOptions::new().read(true).open(path)?,
            Mode::Write => {
                let file = OpenOptions::new().read(true).write(true).open(path)?;
                if let Err(e) = file.try_lock_exclusive() {
                    if e.kind() == fs2::lock_contended_error().kind() {
                        return Err(Error::InvalidOp(format!(
                            "object index is locked by another writer: {}",
                            path.display()
                        )));
                    }
                    return Err(e.into());
                }
                file
            }
        };

        let len = file.metadata()?.len();
        if len < HEADER_SIZE as u64 {
            return Err(Error::corrupt(path, format!("file too short ({} bytes)", len)));
        }
        let map = Self::map(&file, mode)?;
        let header = Header::decode(path, map.bytes())?;

        let expected = header
            .pcnt
            .checked_mul(PAGE_SIZE as u64)
            .and_then(|n| n.checked_add(HEADER_SIZE as u64));
        if expected != Some(len) {
            return Err(Error::corrupt(
                path,
                format!("length {} does not match {} pages", len, header.pcnt),
            ));
        }
        // Cannot overflow: pcnt * PAGE_SIZE fit above.
        if header.ocnt > header.pcnt * RECORDS_PER_PAGE {
            return Err(Error::corrupt(
                path,
                format!("object count {} exceeds page capacity", header.ocnt),
            ));
        }

        tracing::debug!(path = %path.display(), ?mode, ocnt = header.ocnt, "opened object index");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            mode,
            map: Some(map),
            header,
            modified: false,
            closed: false,
        })
    }

    fn map(file: &File, mode: Mode) -> Result<Mapping> {
        // SAFETY: the writer holds an exclusive lock on the file, and gart
        // never truncates an index below its mapped length.
        let map = match mode {
            Mode::Read => Mapping::Read(unsafe { Mmap::map(file)? }),
            Mode::Write => Mapping::Write(unsafe { MmapMut::map_mut(file)? }),
        };
        Ok(map)
    }

    fn bytes(&self) -> Result<&[u8]> {
        if self.closed {
            return Err(Error::AlreadyClosed);
        }
        self.map
            .as_ref()
            .map(Mapping::bytes)
            .ok_or_else(|| Error::Bug("object index mapping missing".to_string()))
    }

    fn bytes_mut(&mut self) -> Result<&mut [u8]> {
        if self.closed {
            return Err(Error::AlreadyClosed);
        }
        match self.map.as_mut() {
            Some(Mapping::Write(m)) => Ok(&mut m[..]),
            Some(Mapping::Read(_)) => Err(Error::InvalidOp(
                "object index opened read-only".to_string(),
            )),
            None => Err(Error::Bug("object index mapping missing".to_string())),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of indexed objects; also the greatest valid key.
    pub fn object_count(&self) -> u64 {
        self.header.ocnt
    }

    pub fn page_count(&self) -> u64 {
        self.header.pcnt
    }

    /// Creation time of the index, unix nanoseconds.
    pub fn created(&self) -> i64 {
        self.header.created
    }

    /// Last header rewrite, unix nanoseconds.
    pub fn updated(&self) -> i64 {
        self.header.updated
    }

    /// Append `oid` and return its key.
    pub fn add_object(&mut self, oid: &Oid) -> Result<u64> {
        if self.mode != Mode::Write {
            return Err(Error::InvalidOp(
                "add_object requires write mode".to_string(),
            ));
        }
        if self.header.ocnt == self.header.pcnt * RECORDS_PER_PAGE {
            self.extend()?;
        }

        let offset = HEADER_SIZE + self.header.ocnt as usize * RECORD_SIZE;
        let bytes = self.bytes_mut()?;
        bytes[offset..offset + RECORD_SIZE].copy_from_slice(oid.as_bytes());
        self.header.ocnt += 1;
        self.modified = true;
        Ok(self.header.ocnt)
    }

    /// Grow the file by one page and remap it. The header is rewritten at
    /// once so the page count on disk always matches the file length.
    fn extend(&mut self) -> Result<()> {
        if let Some(Mapping::Write(m)) = self.map.as_ref() {
            m.flush()?;
        }
        self.map = None;
        let new_len = HEADER_SIZE as u64 + (self.header.pcnt + 1) * PAGE_SIZE as u64;
        self.file.set_len(new_len)?;
        self.map = Some(Self::map(&self.file, self.mode)?);
        self.header.pcnt += 1;
        self.write_header()?;
        tracing::debug!(pages = self.header.pcnt, "extended object index");
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        self.header.updated = now_nanos().max(self.header.created);
        let encoded = self.header.encode();
        let bytes = self.bytes_mut()?;
        bytes[..HEADER_SIZE].copy_from_slice(&encoded);
        if let Some(Mapping::Write(m)) = self.map.as_ref() {
            m.flush()?;
        }
        Ok(())
    }

    /// Rewrite the header with current counts and sync the mapping.
    pub fn flush(&mut self) -> Result<()> {
        if self.mode != Mode::Write || !self.modified {
            return Ok(());
        }
        self.write_header()?;
        self.modified = false;
        Ok(())
    }

    fn check_key(&self, key: u64) -> Result<()> {
        if key == 0 || key > self.header.ocnt {
            return Err(Error::OutOfRange {
                key,
                count: self.header.ocnt,
            });
        }
        Ok(())
    }

    fn record(&self, key: u64) -> Result<Oid> {
        let offset = HEADER_SIZE + (key - 1) as usize * RECORD_SIZE;
        let bytes = self.bytes()?;
        Oid::from_slice(&bytes[offset..offset + RECORD_SIZE])
            .map_err(|e| Error::corrupt(&self.path, format!("record {}: {}", key, e)))
    }

    /// OID stored under `key`.
    pub fn get(&self, key: u64) -> Result<Oid> {
        self.check_key(key)?;
        self.record(key)
    }

    /// OIDs for `keys`, returned in ascending key order.
    pub fn get_oids(&self, keys: &[u64]) -> Result<Vec<Oid>> {
        let mut keys = keys.to_vec();
        keys.sort_unstable();
        for &key in &keys {
            self.check_key(key)?;
        }
        keys.iter().map(|&key| self.record(key)).collect()
    }

    /// Every OID whose key is not in `keys`, in ascending key order.
    pub fn get_oids_excluding(&self, keys: &[u64]) -> Result<Vec<Oid>> {
        let mut skip = keys.to_vec();
        skip.sort_unstable();
        skip.dedup();

        let mut out = Vec::new();
        let mut s = skip.iter().peekable();
        for key in 1..=self.header.ocnt {
            while s.next_if(|&&k| k < key).is_some() {}
            if s.next_if_eq(&&key).is_some() {
                continue;
            }
            out.push(self.record(key)?);
        }
        Ok(out)
    }

    /// Every `(key, oid)` pair in key order.
    pub fn entries(&self) -> Result<Vec<(u64, Oid)>> {
        (1..=self.header.ocnt)
            .map(|key| self.record(key).map(|oid| (key, oid)))
            .collect()
    }

    /// Key of `oid`, by linear scan.
    pub fn key_of(&self, oid: &Oid) -> Result<Option<u64>> {
        for key in 1..=self.header.ocnt {
            if self.record(key)? == *oid {
                return Ok(Some(key));
            }
        }
        Ok(None)
    }

    /// Entries whose hex rendering starts with `prefix`.
    pub fn find_prefix(&self, prefix: &str) -> Result<Vec<(u64, Oid)>> {
        let prefix = prefix.to_lowercase();
        Ok(self
            .entries()?
            .into_iter()
            .filter(|(_, oid)| oid.to_hex().starts_with(&prefix))
            .collect())
    }

    /// Flush the header if anything changed, unmap, and release the lock.
    /// Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush()?;
        self.map = None;
        if self.mode == Mode::Write {
            FileExt::unlock(&self.file)?;
        }
        self.closed = true;
        tracing::debug!(path = %self.path.display(), "closed object index");
        Ok(())
    }
}

impl Drop for ObjectIndex {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(path = %self.path.display(), error = %e, "failed to close object index");
        }
    }
}
