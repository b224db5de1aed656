//! Tag dictionary.
//!
//! Every tag that has ever been attached to an object gets an entry
//! `{ name, id, flags, refcnt }`. Names are the primary key and are stored
//! lower-cased. Ids are derived from insertion order and skip multiples of
//! eight (1..=7, 9..=15, 17..), which keeps repositories written by older
//! byte-aligned tooling readable.
//!
//! File layout:
//!
//! ```text
//! header (4096 bytes):
//!   magic (8) | CRC-64 of bytes 16..EOF (8) | created ns (8) |
//!   updated ns (8) | tag count (8) | reserved zeros
//! records, in insertion order:
//!   flags (1) | refcnt u32 LE (4) | name length (1) | name bytes
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use gart_core::digest::{crc64, tagdict_magic};
use gart_core::systemic;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::fs::{now_nanos, read_full, swap_write};

pub const HEADER_SIZE: usize = 4096;

/// Longest accepted tag name, in bytes.
pub const MAX_NAME_LEN: usize = 250;

/// Entry flag: name lives in the `systemic:` namespace.
pub const FLAG_SYSTEMIC: u8 = 0x01;

const RECORD_FIXED: usize = 6;

/// Trim, lower-case and validate a tag name.
pub fn canonical_name(name: &str) -> Result<String> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return Err(Error::InvalidArg("empty tag name".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidArg(format!(
            "tag name longer than {} bytes: {}...",
            MAX_NAME_LEN,
            name.chars().take(16).collect::<String>()
        )));
    }
    if name.contains('\n') {
        return Err(Error::InvalidArg(format!(
            "tag name contains a newline: {:?}",
            name
        )));
    }
    Ok(name)
}

/// Id of the entry at `ordinal` (0-based insertion position).
pub fn id_for_ordinal(ordinal: usize) -> u32 {
    (ordinal + 1 + ordinal / 7) as u32
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagEntry {
    pub name: String,
    pub id: u32,
    pub flags: u8,
    pub refcnt: u32,
}

impl TagEntry {
    pub fn is_systemic(&self) -> bool {
        self.flags & FLAG_SYSTEMIC != 0
    }
}

#[derive(Debug)]
pub struct TagDict {
    path: PathBuf,
    created: i64,
    updated: i64,
    entries: Vec<TagEntry>,
    by_name: HashMap<String, usize>,
    modified: bool,
}

impl TagDict {
    fn empty(path: &Path) -> Self {
        let now = now_nanos();
        Self {
            path: path.to_path_buf(),
            created: now,
            updated: now,
            entries: Vec::new(),
            by_name: HashMap::new(),
            modified: false,
        }
    }

    /// Write an empty dictionary at `path`.
    pub fn create(path: &Path) -> Result<()> {
        if path.exists() {
            return Err(Error::AlreadyExists(format!(
                "tag dictionary {}",
                path.display()
            )));
        }
        let dict = Self::empty(path);
        swap_write(path, &dict.encode())?;
        tracing::debug!(path = %path.display(), "created tag dictionary");
        Ok(())
    }

    pub fn load(path: &Path, create_if_missing: bool) -> Result<Self> {
        match read_full(path)? {
            Some(bytes) => Self::decode(path, &bytes),
            None if create_if_missing => {
                Self::create(path)?;
                Ok(Self::empty(path))
            }
            None => Err(Error::corrupt(path, "tag dictionary is missing")),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&tagdict_magic());
        buf[16..24].copy_from_slice(&self.created.to_le_bytes());
        buf[24..32].copy_from_slice(&self.updated.to_le_bytes());
        buf[32..40].copy_from_slice(&(self.entries.len() as u64).to_le_bytes());
        for e in &self.entries {
            buf.push(e.flags);
            buf.extend_from_slice(&e.refcnt.to_le_bytes());
            buf.push(e.name.len() as u8);
            buf.extend_from_slice(e.name.as_bytes());
        }
        let crc = crc64(&buf[16..]);
        buf[8..16].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    fn decode(path: &Path, buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::corrupt(path, "short header"));
        }
        if buf[0..8] != tagdict_magic() {
            return Err(Error::corrupt(path, "bad magic"));
        }
        let field = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(b)
        };
        if field(8) != crc64(&buf[16..]) {
            return Err(Error::corrupt(path, "checksum mismatch"));
        }
        let count = field(32);

        let mut dict = Self::empty(path);
        dict.created = field(16) as i64;
        dict.updated = field(24) as i64;

        let mut pos = HEADER_SIZE;
        while pos < buf.len() {
            if pos + RECORD_FIXED > buf.len() {
                return Err(Error::corrupt(path, format!("truncated record at {}", pos)));
            }
            let flags = buf[pos];
            let refcnt = u32::from_le_bytes([buf[pos + 1], buf[pos + 2], buf[pos + 3], buf[pos + 4]]);
            let len = buf[pos + 5] as usize;
            let start = pos + RECORD_FIXED;
            let name = buf
                .get(start..start + len)
                .ok_or_else(|| Error::corrupt(path, format!("truncated name at {}", pos)))?;
            let name = std::str::from_utf8(name)
                .map_err(|_| Error::corrupt(path, format!("name at {} is not UTF-8", pos)))?;
            if len == 0 || dict.by_name.contains_key(name) {
                return Err(Error::corrupt(path, format!("bad or duplicate name at {}", pos)));
            }
            dict.push(name.to_string(), flags, refcnt);
            pos = start + len;
        }

        if dict.entries.len() as u64 != count {
            return Err(Error::corrupt(
                path,
                format!("header counts {} tags, found {}", count, dict.entries.len()),
            ));
        }
        tracing::debug!(path = %path.display(), tags = count, "loaded tag dictionary");
        Ok(dict)
    }

    fn push(&mut self, name: String, flags: u8, refcnt: u32) -> u32 {
        let ordinal = self.entries.len();
        let id = id_for_ordinal(ordinal);
        self.by_name.insert(name.clone(), ordinal);
        self.entries.push(TagEntry {
            name,
            id,
            flags,
            refcnt,
        });
        id
    }

    /// Register `name`. Returns whether it was new, and its id.
    pub fn add(&mut self, name: &str) -> Result<(bool, u32)> {
        let name = canonical_name(name)?;
        if let Some(&i) = self.by_name.get(&name) {
            return Ok((false, self.entries[i].id));
        }
        let flags = if systemic::is_systemic(&name) {
            FLAG_SYSTEMIC
        } else {
            0
        };
        let id = self.push(name, flags, 0);
        self.modified = true;
        Ok((true, id))
    }

    fn entry_mut(&mut self, name: &str) -> Result<&mut TagEntry> {
        let name = name.trim().to_lowercase();
        match self.by_name.get(&name) {
            Some(&i) => Ok(&mut self.entries[i]),
            None => Err(Error::TagNotFound(name)),
        }
    }

    /// Bump the reference count of `name`; returns the new count.
    pub fn incr_refcnt(&mut self, name: &str) -> Result<u32> {
        let entry = self.entry_mut(name)?;
        entry.refcnt = entry.refcnt.saturating_add(1);
        let refcnt = entry.refcnt;
        self.modified = true;
        Ok(refcnt)
    }

    /// Drop one reference from `name`, saturating at zero.
    pub fn decr_refcnt(&mut self, name: &str) -> Result<u32> {
        let entry = self.entry_mut(name)?;
        if entry.refcnt == 0 {
            tracing::warn!(tag = %entry.name, "refcount underflow");
            return Ok(0);
        }
        entry.refcnt -= 1;
        let refcnt = entry.refcnt;
        self.modified = true;
        Ok(refcnt)
    }

    /// Overwrite the reference count of `name`.
    pub fn set_refcnt(&mut self, name: &str, refcnt: u32) -> Result<()> {
        let entry = self.entry_mut(name)?;
        if entry.refcnt != refcnt {
            entry.refcnt = refcnt;
            self.modified = true;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TagEntry> {
        self.by_name
            .get(&name.trim().to_lowercase())
            .map(|&i| &self.entries[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Split `names` into ids of known tags and names never registered.
    pub fn select_tags<I, S>(&self, names: I) -> (Vec<u32>, Vec<String>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut found = Vec::new();
        let mut undefined = Vec::new();
        for name in names {
            match self.get(name.as_ref()) {
                Some(e) => found.push(e.id),
                None => undefined.push(name.as_ref().trim().to_lowercase()),
            }
        }
        (found, undefined)
    }

    /// Entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = &TagEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist if anything changed. Returns whether a write happened.
    pub fn sync(&mut self) -> Result<bool> {
        if !self.modified {
            return Ok(false);
        }
        self.updated = now_nanos().max(self.created);
        swap_write(&self.path, &self.encode())?;
        self.modified = false;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fresh() -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tagdict.dat");
        TagDict::create(&path).unwrap();
        (tmp, path)
    }

    #[test]
    fn test_ids_skip_multiples_of_eight() {
        let ids: Vec<u32> = (0..17).map(id_for_ordinal).collect();
        assert_eq!(
            ids,
            vec![1, 2, 3, 4, 5, 6, 7, 9, 10, 11, 12, 13, 14, 15, 17, 18, 19]
        );
        assert!(ids.iter().all(|id| id % 8 != 0));
    }

    #[test]
    fn test_add_and_reload() {
        let (_tmp, path) = fresh();
        let mut dict = TagDict::load(&path, false).unwrap();
        assert_eq!(dict.add("Greet").unwrap(), (true, 1));
        assert_eq!(dict.add("greet ").unwrap(), (false, 1));
        assert_eq!(dict.add("systemic:gart-object").unwrap(), (true, 2));
        assert_eq!(dict.incr_refcnt("greet").unwrap(), 1);
        assert_eq!(dict.incr_refcnt("GREET").unwrap(), 2);
        assert!(dict.sync().unwrap());
        assert!(!dict.sync().unwrap());

        let dict = TagDict::load(&path, false).unwrap();
        assert_eq!(dict.len(), 2);
        let greet = dict.get("greet").unwrap();
        assert_eq!(greet.refcnt, 2);
        assert!(!greet.is_systemic());
        assert!(dict.get("systemic:gart-object").unwrap().is_systemic());
    }

    #[test]
    fn test_name_validation() {
        let (_tmp, path) = fresh();
        let mut dict = TagDict::load(&path, false).unwrap();
        assert!(matches!(dict.add("  "), Err(Error::InvalidArg(_))));
        assert!(matches!(dict.add("a\nb"), Err(Error::InvalidArg(_))));
        assert!(dict.add(&"x".repeat(MAX_NAME_LEN)).is_ok());
        assert!(matches!(
            dict.add(&"x".repeat(MAX_NAME_LEN + 1)),
            Err(Error::InvalidArg(_))
        ));
    }

    #[test]
    fn test_refcnt_errors_and_underflow() {
        let (_tmp, path) = fresh();
        let mut dict = TagDict::load(&path, false).unwrap();
        assert!(matches!(dict.incr_refcnt("nope"), Err(Error::TagNotFound(_))));
        dict.add("t").unwrap();
        assert_eq!(dict.decr_refcnt("t").unwrap(), 0);
        dict.incr_refcnt("t").unwrap();
        assert_eq!(dict.decr_refcnt("t").unwrap(), 0);
    }

    #[test]
    fn test_select_tags() {
        let (_tmp, path) = fresh();
        let mut dict = TagDict::load(&path, false).unwrap();
        dict.add("red").unwrap();
        dict.add("blue").unwrap();
        let (found, undefined) = dict.select_tags(["blue", "Green", "red"]);
        assert_eq!(found, vec![2, 1]);
        assert_eq!(undefined, vec!["green"]);
    }

    #[test]
    fn test_create_if_missing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tagdict.dat");
        assert!(matches!(
            TagDict::load(&path, false),
            Err(Error::Corrupt { .. })
        ));
        let dict = TagDict::load(&path, true).unwrap();
        assert!(dict.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn test_corruption_detected() {
        let (_tmp, path) = fresh();
        let mut dict = TagDict::load(&path, false).unwrap();
        dict.add("red").unwrap();
        dict.sync().unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x20;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            TagDict::load(&path, false),
            Err(Error::Corrupt { .. })
        ));
    }
}
