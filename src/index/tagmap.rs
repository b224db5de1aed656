//! Per-tag bitmaps.
//!
//! Bit `k - 1` of a tag's bitmap is set iff the object with key `k` carries
//! the tag. Each tagmap lives in its own file addressed by a digest of the
//! canonical (lower-case) tag name:
//!
//! ```text
//! tagmaps/<first 2 hex>/<next 14 hex>.bitmap
//! ```
//!
//! The file is a 48-byte header followed by the WAHL-encoded bitmap:
//! magic (8) | CRC-64 of bytes 16..EOF (8) | created ns (8) | updated ns (8)
//! | bitmap bytes (8) | max bit (8).

use std::fs::File;
use std::path::{Path, PathBuf};

use gart_core::digest::{crc64, digest64, tagmap_magic};
use gart_core::Wahl;
use memmap2::MmapOptions;

use crate::error::{Error, Result};
use crate::fs::{now_nanos, swap_write};

pub const HEADER_SIZE: usize = 48;

/// File holding the bitmap for `tag` under `root`.
pub fn tagmap_path(root: &Path, tag: &str) -> PathBuf {
    let hex = format!("{:016x}", digest64(&tag.to_lowercase()));
    root.join(&hex[..2]).join(format!("{}.bitmap", &hex[2..]))
}

fn key_bits(keys: &[u64]) -> Result<Vec<u64>> {
    keys.iter()
        .map(|&k| {
            k.checked_sub(1)
                .ok_or_else(|| Error::InvalidArg("object key 0 is never assigned".to_string()))
        })
        .collect()
}

#[derive(Debug)]
pub struct Tagmap {
    name: String,
    path: PathBuf,
    created: i64,
    updated: i64,
    bitmap: Wahl,
    dirty: bool,
}

impl Tagmap {
    fn empty(root: &Path, tag: &str) -> Self {
        let now = now_nanos();
        Self {
            name: tag.to_lowercase(),
            path: tagmap_path(root, tag),
            created: now,
            updated: now,
            bitmap: Wahl::new(),
            dirty: false,
        }
    }

    /// Write an empty tagmap for `tag` and return it.
    pub fn create(root: &Path, tag: &str) -> Result<Self> {
        let map = Self::empty(root, tag);
        swap_write(&map.path, &map.encode())?;
        tracing::debug!(tag = %map.name, path = %map.path.display(), "created tagmap");
        Ok(map)
    }

    /// Load the tagmap for `tag`. A missing file is created when
    /// `create_if_missing` is set and is `TagNotFound` otherwise.
    pub fn load(root: &Path, tag: &str, create_if_missing: bool) -> Result<Self> {
        let path = tagmap_path(root, tag);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if create_if_missing {
                    return Self::create(root, tag);
                }
                return Err(Error::TagNotFound(tag.to_lowercase()));
            }
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata()?.len();
        if len < HEADER_SIZE as u64 {
            return Err(Error::corrupt(&path, format!("file too short ({} bytes)", len)));
        }
        // SAFETY: private read-only mapping; writers never modify tagmap
        // files in place, they rename a new file over them.
        let map = unsafe { MmapOptions::new().map_copy_read_only(&file)? };

        let mut out = Self::empty(root, tag);
        out.decode(&map)?;
        tracing::debug!(tag = %out.name, bits = out.bitmap.count_ones(), "loaded tagmap");
        Ok(out)
    }

    fn encode(&self) -> Vec<u8> {
        let body = self.bitmap.to_bytes();
        let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());
        buf.extend_from_slice(&tagmap_magic());
        buf.extend_from_slice(&[0u8; 8]);
        buf.extend_from_slice(&self.created.to_le_bytes());
        buf.extend_from_slice(&self.updated.to_le_bytes());
        buf.extend_from_slice(&(body.len() as u64).to_le_bytes());
        buf.extend_from_slice(&self.bitmap.max().to_le_bytes());
        buf.extend_from_slice(&body);
        let crc = crc64(&buf[16..]);
        buf[8..16].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    fn decode(&mut self, buf: &[u8]) -> Result<()> {
        let path = self.path.clone();
        if buf[0..8] != tagmap_magic() {
            return Err(Error::corrupt(&path, "bad magic"));
        }
        let field = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(b)
        };
        if field(8) != crc64(&buf[16..]) {
            return Err(Error::corrupt(&path, "checksum mismatch"));
        }
        let size = field(32);
        if size != (buf.len() - HEADER_SIZE) as u64 {
            return Err(Error::corrupt(
                &path,
                format!("bitmap size {} does not match file", size),
            ));
        }
        let bitmap = Wahl::decode(&buf[HEADER_SIZE..])
            .map_err(|e| Error::corrupt(&path, e.to_string()))?;
        if bitmap.max() != field(40) {
            return Err(Error::corrupt(&path, "max bit does not match bitmap"));
        }
        self.created = field(16) as i64;
        self.updated = field(24) as i64;
        self.bitmap = bitmap;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bitmap(&self) -> &Wahl {
        &self.bitmap
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark `keys` as carrying this tag.
    pub fn update(&mut self, keys: &[u64]) -> Result<bool> {
        let changed = self.bitmap.set(&key_bits(keys)?);
        self.dirty |= changed;
        Ok(changed)
    }

    /// Unmark `keys`.
    pub fn clear(&mut self, keys: &[u64]) -> Result<bool> {
        let changed = self.bitmap.clear(&key_bits(keys)?);
        self.dirty |= changed;
        Ok(changed)
    }

    /// Replace the whole bitmap with exactly `keys`.
    pub fn replace(&mut self, keys: &[u64]) -> Result<()> {
        self.bitmap = Wahl::from_bits(key_bits(keys)?);
        self.dirty = true;
        Ok(())
    }

    pub fn contains(&self, key: u64) -> bool {
        key > 0 && self.bitmap.get(key - 1)
    }

    /// Keys of tagged objects, ascending.
    pub fn keys(&self) -> Vec<u64> {
        self.bitmap.bits().map(|b| b + 1).collect()
    }

    /// Compress and write the bitmap if it changed. Returns whether a write
    /// happened.
    pub fn save(&mut self) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        self.bitmap.compress();
        self.updated = now_nanos().max(self.created);
        swap_write(&self.path, &self.encode())?;
        self.dirty = false;
        tracing::debug!(tag = %self.name, blocks = self.bitmap.len(), "saved tagmap");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_path_derivation() {
        let root = Path::new("/r/tagmaps");
        let p = tagmap_path(root, "Greet");
        assert_eq!(p, tagmap_path(root, "greet"));
        let hex = format!("{:016x}", digest64("greet"));
        assert_eq!(
            p,
            root.join(&hex[..2]).join(format!("{}.bitmap", &hex[2..]))
        );
        assert_eq!(p.file_stem().unwrap().len(), 14);
    }

    #[test]
    fn test_update_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut map = Tagmap::load(tmp.path(), "red", true).unwrap();
        assert!(map.keys().is_empty());
        assert!(map.update(&[1, 5, 300]).unwrap());
        assert!(!map.update(&[5]).unwrap());
        assert!(map.save().unwrap());
        assert!(!map.save().unwrap());

        let map = Tagmap::load(tmp.path(), "RED", false).unwrap();
        assert_eq!(map.keys(), vec![1, 5, 300]);
        assert!(map.contains(300));
        assert!(!map.contains(2));
        assert!(!map.contains(0));
    }

    #[test]
    fn test_missing_tag() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            Tagmap::load(tmp.path(), "nope", false),
            Err(Error::TagNotFound(_))
        ));
    }

    #[test]
    fn test_key_zero_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut map = Tagmap::load(tmp.path(), "t", true).unwrap();
        assert!(matches!(map.update(&[0]), Err(Error::InvalidArg(_))));
    }

    #[test]
    fn test_clear_and_replace() {
        let tmp = TempDir::new().unwrap();
        let mut map = Tagmap::load(tmp.path(), "t", true).unwrap();
        map.update(&[1, 2, 3]).unwrap();
        assert!(map.clear(&[2]).unwrap());
        assert!(!map.clear(&[1000]).unwrap());
        assert_eq!(map.keys(), vec![1, 3]);
        map.replace(&[7]).unwrap();
        map.save().unwrap();
        assert_eq!(Tagmap::load(tmp.path(), "t", false).unwrap().keys(), vec![7]);
    }

    #[test]
    fn test_corruption_detected() {
        let tmp = TempDir::new().unwrap();
        let mut map = Tagmap::load(tmp.path(), "t", true).unwrap();
        map.update(&[10]).unwrap();
        map.save().unwrap();

        let path = tagmap_path(tmp.path(), "t");
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[HEADER_SIZE] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            Tagmap::load(tmp.path(), "t", false),
            Err(Error::Corrupt { .. })
        ));

        std::fs::write(&path, &bytes[..20]).unwrap();
        assert!(matches!(
            Tagmap::load(tmp.path(), "t", false),
            Err(Error::Corrupt { .. })
        ));
    }
}
