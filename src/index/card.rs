//! Per-object metadata cards.
//!
//! A card records everything gart knows about one object: its key in the
//! object index, its type, user tags, systemic tags, and either the file
//! paths the content was seen at or the inline text itself.
//!
//! # Binary layout
//!
//! ```text
//!  0  magic            4   sha256("card-file")[..4]
//!  4  crc32            4   over bytes 8..EOF
//!  8  created          8   unix seconds
//! 16  updated          8   unix seconds
//! 24  flags            1   0x01 deleted, 0x02 locked
//! 25  path count       1
//! 26  tag bytes        1
//! 27  systemic bytes   1
//! 28  revision         2
//! 30  reserved         2
//! 32  oid             32
//! 64  key              8
//! 72  type             1
//! 73  tags             newline-separated names
//!  .  systemic tags    newline-separated names
//!  .  data             File: newline-terminated paths; Text: text to EOF
//! ```
//!
//! Cards are stored at `cards/<first 2 hex>/<remaining 62 hex>.card` and
//! replaced wholesale through swap-rename.

use std::path::{Path, PathBuf};

use gart_core::digest::{card_magic, crc32};
use gart_core::{ObjectType, Oid};
use serde::Serialize;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::fs::{now_secs, read_full, swap_write};

pub const HEADER_SIZE: usize = 32;
const FIXED_BODY: usize = 32 + 8 + 1;

pub const FLAG_DELETED: u8 = 0x01;
pub const FLAG_LOCKED: u8 = 0x02;

/// Largest tag or systemic region, in bytes.
pub const MAX_REGION: usize = 255;
pub const MAX_PATHS: usize = 255;

/// Content-specific part of a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CardData {
    Paths(Vec<String>),
    Text(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct Card {
    oid: Oid,
    key: u64,
    #[serde(rename = "type")]
    kind: ObjectType,
    created: i64,
    updated: i64,
    flags: u8,
    revision: u16,
    tags: Vec<String>,
    systemic: Vec<String>,
    data: CardData,
    #[serde(skip)]
    fresh: bool,
    #[serde(skip)]
    modified: bool,
}

impl PartialEq for Card {
    fn eq(&self, other: &Self) -> bool {
        self.oid == other.oid
            && self.key == other.key
            && self.kind == other.kind
            && self.created == other.created
            && self.updated == other.updated
            && self.flags == other.flags
            && self.revision == other.revision
            && self.tags == other.tags
            && self.systemic == other.systemic
            && self.data == other.data
    }
}

fn region_len(names: &[String]) -> usize {
    if names.is_empty() {
        return 0;
    }
    names.iter().map(|n| n.len()).sum::<usize>() + names.len() - 1
}

fn split_region(bytes: &[u8]) -> std::result::Result<Vec<String>, std::str::Utf8Error> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    Ok(std::str::from_utf8(bytes)?
        .split('\n')
        .map(str::to_string)
        .collect())
}

fn path_string(path: &Path) -> Result<String> {
    let s = path
        .to_str()
        .ok_or_else(|| Error::InvalidArg(format!("path is not UTF-8: {}", path.display())))?;
    if s.is_empty() || s.contains('\n') {
        return Err(Error::InvalidArg(format!("unusable path: {:?}", s)));
    }
    Ok(s.to_string())
}

impl Card {
    fn new(oid: Oid, kind: ObjectType, data: CardData) -> Self {
        let now = now_secs();
        Self {
            oid,
            key: 0,
            kind,
            created: now,
            updated: now,
            flags: 0,
            revision: 1,
            tags: Vec::new(),
            systemic: Vec::new(),
            data,
            fresh: true,
            modified: true,
        }
    }

    pub fn new_text(oid: Oid, text: &str) -> Self {
        Self::new(oid, ObjectType::Text, CardData::Text(text.to_string()))
    }

    pub fn new_file(oid: Oid, path: &Path) -> Result<Self> {
        let path = path_string(path)?;
        Ok(Self::new(oid, ObjectType::File, CardData::Paths(vec![path])))
    }

    pub fn oid(&self) -> &Oid {
        &self.oid
    }

    /// Object index key; 0 until [`Card::set_key`] runs.
    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn kind(&self) -> ObjectType {
        self.kind
    }

    pub fn created(&self) -> i64 {
        self.created
    }

    pub fn updated(&self) -> i64 {
        self.updated
    }

    pub fn revision(&self) -> u16 {
        self.revision
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn systemic(&self) -> &[String] {
        &self.systemic
    }

    /// User and systemic tags together.
    pub fn all_tags(&self) -> impl Iterator<Item = &String> {
        self.tags.iter().chain(self.systemic.iter())
    }

    pub fn data(&self) -> &CardData {
        &self.data
    }

    pub fn paths(&self) -> &[String] {
        match &self.data {
            CardData::Paths(p) => p,
            CardData::Text(_) => &[],
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.data {
            CardData::Text(t) => Some(t),
            CardData::Paths(_) => None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.flags & FLAG_DELETED != 0
    }

    pub fn is_locked(&self) -> bool {
        self.flags & FLAG_LOCKED != 0
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn has_path(&self, path: &Path) -> bool {
        match path.to_str() {
            Some(s) => self.paths().iter().any(|p| p == s),
            None => false,
        }
    }

    /// Assign the object index key. A key can be set only once.
    pub fn set_key(&mut self, key: u64) -> Result<()> {
        if key == 0 {
            return Err(Error::InvalidArg("object key 0 is never assigned".to_string()));
        }
        if self.key != 0 {
            return Err(Error::IllegalState(format!(
                "card {} already has key {}",
                self.oid.fingerprint(12),
                self.key
            )));
        }
        self.key = key;
        self.modified = true;
        Ok(())
    }

    /// Record another path the content was found at. Returns false when the
    /// path is already listed.
    pub fn add_path(&mut self, path: &Path) -> Result<bool> {
        let path = path_string(path)?;
        let oid = self.oid;
        let paths = match &mut self.data {
            CardData::Paths(p) => p,
            CardData::Text(_) => {
                return Err(Error::InvalidOp(format!(
                    "card {} holds text, not paths",
                    oid.fingerprint(12)
                )))
            }
        };
        if paths.contains(&path) {
            return Ok(false);
        }
        if paths.len() >= MAX_PATHS {
            return Err(Error::InvalidArg(format!(
                "card {} already lists {} paths",
                oid.fingerprint(12),
                MAX_PATHS
            )));
        }
        paths.push(path);
        self.modified = true;
        Ok(true)
    }

    /// Forget a path. A file card must keep at least one.
    pub fn remove_path(&mut self, path: &Path) -> Result<bool> {
        let oid = self.oid;
        let paths = match &mut self.data {
            CardData::Paths(p) => p,
            CardData::Text(_) => return Ok(false),
        };
        let Some(pos) = path.to_str().and_then(|s| paths.iter().position(|p| p == s)) else {
            return Ok(false);
        };
        if paths.len() == 1 {
            return Err(Error::IllegalState(format!(
                "cannot remove the last path of {}",
                oid.fingerprint(12)
            )));
        }
        paths.remove(pos);
        self.modified = true;
        Ok(true)
    }

    fn add_names(list: &mut Vec<String>, names: &[String]) -> Result<Vec<String>> {
        let mut added: Vec<String> = Vec::new();
        for name in names {
            if !list.contains(name) && !added.contains(name) {
                added.push(name.clone());
            }
        }
        let mut grown = list.clone();
        grown.extend(added.iter().cloned());
        if region_len(&grown) > MAX_REGION {
            return Err(Error::InvalidArg(format!(
                "tags would occupy {} bytes; a card holds at most {}",
                region_len(&grown),
                MAX_REGION
            )));
        }
        *list = grown;
        Ok(added)
    }

    /// Attach user tags. Returns the names that were not already present.
    pub fn add_tag(&mut self, names: &[String]) -> Result<Vec<String>> {
        let added = Self::add_names(&mut self.tags, names)?;
        self.modified |= !added.is_empty();
        Ok(added)
    }

    /// Detach user tags. Returns the names that were present.
    pub fn remove_tag(&mut self, names: &[String]) -> Vec<String> {
        let removed: Vec<String> = self
            .tags
            .iter()
            .filter(|t| names.contains(t))
            .cloned()
            .collect();
        self.tags.retain(|t| !removed.contains(t));
        self.modified |= !removed.is_empty();
        removed
    }

    /// Attach systemic tags. Returns the names that were not already present.
    pub fn add_systemic(&mut self, names: &[String]) -> Result<Vec<String>> {
        let added = Self::add_names(&mut self.systemic, names)?;
        self.modified |= !added.is_empty();
        Ok(added)
    }

    /// Soft-delete. Returns false when already deleted.
    pub fn mark_deleted(&mut self) -> Result<bool> {
        if self.is_locked() {
            return Err(Error::InvalidOp(format!(
                "object {} is locked",
                self.oid.fingerprint(12)
            )));
        }
        if self.is_deleted() {
            return Ok(false);
        }
        self.flags |= FLAG_DELETED;
        self.modified = true;
        Ok(true)
    }

    /// Clear the deleted flag. Returns false when the card was live.
    pub fn undelete(&mut self) -> bool {
        self.set_flag(FLAG_DELETED, false)
    }

    pub fn lock(&mut self) -> bool {
        self.set_flag(FLAG_LOCKED, true)
    }

    pub fn unlock(&mut self) -> bool {
        self.set_flag(FLAG_LOCKED, false)
    }

    fn set_flag(&mut self, flag: u8, on: bool) -> bool {
        let before = self.flags;
        if on {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
        let changed = before != self.flags;
        self.modified |= changed;
        changed
    }

    /// Serialize to the on-disk format.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let tags = self.tags.join("\n");
        let systemic = self.systemic.join("\n");
        if tags.len() > MAX_REGION || systemic.len() > MAX_REGION {
            return Err(Error::InvalidArg(format!(
                "card {} tag region exceeds {} bytes",
                self.oid.fingerprint(12),
                MAX_REGION
            )));
        }
        let path_count = self.paths().len();
        if path_count > MAX_PATHS {
            return Err(Error::InvalidArg(format!(
                "card {} lists more than {} paths",
                self.oid.fingerprint(12),
                MAX_PATHS
            )));
        }

        let mut buf = Vec::with_capacity(HEADER_SIZE + FIXED_BODY + tags.len() + systemic.len());
        buf.extend_from_slice(&card_magic());
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(&self.created.to_le_bytes());
        buf.extend_from_slice(&self.updated.to_le_bytes());
        buf.push(self.flags);
        buf.push(path_count as u8);
        buf.push(tags.len() as u8);
        buf.push(systemic.len() as u8);
        buf.extend_from_slice(&self.revision.to_le_bytes());
        buf.extend_from_slice(&[0u8; 2]);

        buf.extend_from_slice(self.oid.as_bytes());
        buf.extend_from_slice(&self.key.to_le_bytes());
        buf.push(self.kind.code());
        buf.extend_from_slice(tags.as_bytes());
        buf.extend_from_slice(systemic.as_bytes());
        match &self.data {
            CardData::Paths(paths) => {
                for p in paths {
                    buf.extend_from_slice(p.as_bytes());
                    buf.push(b'\n');
                }
            }
            CardData::Text(text) => buf.extend_from_slice(text.as_bytes()),
        }

        let crc = crc32(&buf[8..]);
        buf[4..8].copy_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Parse a card read from `path`, which must be the card of `oid`.
    pub fn decode(path: &Path, oid: &Oid, buf: &[u8]) -> Result<Self> {
        let bad = |reason: &str| Error::corrupt(path, reason);
        if buf.len() < HEADER_SIZE + FIXED_BODY {
            return Err(bad("file too short"));
        }
        if buf[0..4] != card_magic() {
            return Err(bad("bad magic"));
        }
        let stored = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if stored != crc32(&buf[8..]) {
            return Err(bad("checksum mismatch"));
        }
        if buf[30..32] != [0, 0] {
            return Err(bad("reserved bytes are not zero"));
        }

        let i64_at = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[at..at + 8]);
            i64::from_le_bytes(b)
        };
        let created = i64_at(8);
        let updated = i64_at(16);
        let flags = buf[24];
        let path_count = buf[25] as usize;
        let tag_len = buf[26] as usize;
        let sys_len = buf[27] as usize;
        let revision = u16::from_le_bytes([buf[28], buf[29]]);

        let stored_oid = Oid::from_slice(&buf[32..64]).map_err(|e| bad(&e.to_string()))?;
        if stored_oid != *oid {
            return Err(bad("oid does not match file name"));
        }
        let key = i64_at(64) as u64;
        let kind = ObjectType::from_code(buf[72])
            .ok_or_else(|| bad(&format!("unknown object type {}", buf[72])))?;

        let tags_at = HEADER_SIZE + FIXED_BODY;
        let data_at = tags_at + tag_len + sys_len;
        if data_at > buf.len() {
            return Err(bad("tag regions overrun the file"));
        }
        let tags = split_region(&buf[tags_at..tags_at + tag_len]).map_err(|_| bad("tags are not UTF-8"))?;
        let systemic = split_region(&buf[tags_at + tag_len..data_at])
            .map_err(|_| bad("systemic tags are not UTF-8"))?;

        let rest = std::str::from_utf8(&buf[data_at..]).map_err(|_| bad("data is not UTF-8"))?;
        let data = match kind {
            ObjectType::File => {
                if path_count == 0 {
                    return Err(bad("file card without paths"));
                }
                let Some(body) = rest.strip_suffix('\n') else {
                    return Err(bad("unterminated path list"));
                };
                let paths: Vec<String> = body.split('\n').map(str::to_string).collect();
                if paths.len() != path_count {
                    return Err(bad("path count does not match header"));
                }
                CardData::Paths(paths)
            }
            _ => {
                if path_count != 0 {
                    return Err(bad("text card lists paths"));
                }
                CardData::Text(rest.to_string())
            }
        };

        Ok(Self {
            oid: *oid,
            key,
            kind,
            created,
            updated,
            flags,
            revision,
            tags,
            systemic,
            data,
            fresh: false,
            modified: false,
        })
    }
}

/// Directory of card files, sharded by the first byte of the OID.
#[derive(Debug, Clone)]
pub struct CardStore {
    root: PathBuf,
}

impl CardStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn path_for(&self, oid: &Oid) -> PathBuf {
        let hex = oid.to_hex();
        self.root
            .join(&hex[..2])
            .join(format!("{}.card", &hex[2..]))
    }

    pub fn exists(&self, oid: &Oid) -> bool {
        self.path_for(oid).is_file()
    }

    pub fn load(&self, oid: &Oid) -> Result<Card> {
        let path = self.path_for(oid);
        match read_full(&path)? {
            Some(bytes) => Card::decode(&path, oid, &bytes),
            None => Err(Error::CardNotFound(oid.to_hex())),
        }
    }

    /// Load the card for `oid` if one exists.
    pub fn find(&self, oid: &Oid) -> Result<Option<Card>> {
        match self.load(oid) {
            Ok(card) => Ok(Some(card)),
            Err(Error::CardNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write `card` if it changed. A previously saved card gets its revision
    /// bumped. Returns whether a write happened.
    pub fn save(&self, card: &mut Card) -> Result<bool> {
        if !card.modified {
            return Ok(false);
        }
        if card.kind == ObjectType::File && card.paths().is_empty() {
            return Err(Error::IllegalState(format!(
                "file card {} has no paths",
                card.oid.fingerprint(12)
            )));
        }
        let revision = if card.fresh {
            card.revision
        } else {
            card.revision.checked_add(1).ok_or_else(|| {
                Error::InvalidArg(format!(
                    "card {} exceeded {} revisions",
                    card.oid.fingerprint(12),
                    u16::MAX
                ))
            })?
        };

        let previous = (card.revision, card.updated);
        card.revision = revision;
        card.updated = now_secs().max(card.created);
        let encoded = match card.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                (card.revision, card.updated) = previous;
                return Err(e);
            }
        };
        if let Err(e) = swap_write(&self.path_for(&card.oid), &encoded) {
            (card.revision, card.updated) = previous;
            return Err(e);
        }
        card.fresh = false;
        card.modified = false;
        Ok(true)
    }

    /// OIDs of every card on disk, in no particular order. Swap files and
    /// foreign files are skipped.
    pub fn oids(&self) -> Result<Vec<Oid>> {
        let mut out = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|e| {
                Error::IoFault(
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("card walk failed")),
                )
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            let Some(stem) = name.strip_suffix(".card") else {
                continue;
            };
            if stem.starts_with('.') {
                continue;
            }
            let shard = entry
                .path()
                .parent()
                .and_then(|p| p.file_name())
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            match Oid::from_hex(&format!("{}{}", shard, stem)) {
                Ok(oid) => out.push(oid),
                Err(_) => {
                    tracing::warn!(path = %entry.path().display(), "skipping unrecognized card file");
                }
            }
        }
        Ok(out)
    }
}
