//! Index manager.
//!
//! The single entry point for reading and writing a repository's index.
//! It owns the object index, the tag dictionary, and a cache of loaded
//! tagmaps; cards are loaded on demand.
//!
//! # Lifecycle
//!
//! ```text
//! open(Read | Write) ──► Open ──close()──► Closed
//! ```
//!
//! Mutating calls in `Read` mode fail with `InvalidOp`; every call after
//! `close` fails with `AlreadyClosed`. `close` itself may be repeated.
//!
//! # Write ordering
//!
//! 1. the object index header is flushed as soon as an OID is appended
//! 2. the card is saved
//! 3. tagmaps and the tag dictionary are written at `close`
//!
//! A crash therefore never leaves a card pointing past the durable object
//! count, and lost tagmap updates can be recomputed from the cards with
//! [`IndexManager::rebuild_tagmaps`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use gart_core::systemic::{self, FileDetails};
use gart_core::{BitOp, ObjectType, Oid, Query, Selection, Wahl};
use serde::Serialize;

use super::card::{Card, CardStore};
use super::object_index::{Mode, ObjectIndex};
use super::tagmap::Tagmap;
use crate::error::{Error, Result};
use crate::repo::Repo;
use crate::tagdict::{canonical_name, TagDict};

/// Shortest OID prefix accepted by [`IndexManager::resolve_oid`].
pub const MIN_PREFIX_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Closed,
}

/// Card-level edits applied by [`IndexManager::update_object`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOp {
    Lock,
    Unlock,
    RemovePath(PathBuf),
}

/// Outcome of [`IndexManager::verify`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    pub objects: u64,
    pub cards: u64,
    pub tags: u64,
    pub problems: Vec<String>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Outcome of [`IndexManager::rebuild_tagmaps`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct RebuildReport {
    pub objects: u64,
    pub tags: u64,
    pub missing_cards: u64,
}

/// Canonicalize user-supplied tags: validated, lower-cased, deduplicated,
/// and kept out of the systemic namespace.
pub fn user_tags<S: AsRef<str>>(names: &[S]) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        let name = canonical_name(name.as_ref())?;
        if systemic::is_systemic(&name) {
            return Err(Error::InvalidArg(format!(
                "'{}' is reserved for systemic tags",
                name
            )));
        }
        if !out.contains(&name) {
            out.push(name);
        }
    }
    Ok(out)
}

fn query_tags<S: AsRef<str>>(names: &[S]) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        let name = canonical_name(name.as_ref())?;
        if !out.contains(&name) {
            out.push(name);
        }
    }
    Ok(out)
}

fn to_keys(bitmap: &Wahl) -> Vec<u64> {
    bitmap.bits().map(|b| b + 1).collect()
}

pub struct IndexManager {
    mode: Mode,
    state: State,
    objects: ObjectIndex,
    cards: CardStore,
    tagmaps_root: PathBuf,
    tagmaps: BTreeMap<String, Tagmap>,
    dict: TagDict,
}

impl std::fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManager")
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("objects", &self.objects.object_count())
            .field("tagmaps", &self.tagmaps.len())
            .finish()
    }
}

impl IndexManager {
    pub fn open(repo: &Repo, mode: Mode) -> Result<Self> {
        let objects = ObjectIndex::open(&repo.objects_path(), mode)?;
        let dict = TagDict::load(&repo.tagdict_path(), false)?;
        tracing::debug!(root = %repo.root().display(), ?mode, "opened index manager");
        Ok(Self {
            mode,
            state: State::Open,
            objects,
            cards: CardStore::new(&repo.cards_dir()),
            tagmaps_root: repo.tagmaps_dir(),
            tagmaps: BTreeMap::new(),
            dict,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    fn check_open(&self) -> Result<()> {
        match self.state {
            State::Open => Ok(()),
            State::Closed => Err(Error::AlreadyClosed),
        }
    }

    fn check_write(&self, op: &str) -> Result<()> {
        self.check_open()?;
        if self.mode != Mode::Write {
            return Err(Error::InvalidOp(format!("{} requires write mode", op)));
        }
        Ok(())
    }

    pub fn object_count(&self) -> u64 {
        self.objects.object_count()
    }

    pub fn object_index(&self) -> &ObjectIndex {
        &self.objects
    }

    pub fn dict(&self) -> &TagDict {
        &self.dict
    }

    /// Make sure the tagmap for `name` is cached. Returns false when it
    /// does not exist and `create` is not set.
    fn load_tagmap(&mut self, name: &str, create: bool) -> Result<bool> {
        if self.tagmaps.contains_key(name) {
            return Ok(true);
        }
        match Tagmap::load(&self.tagmaps_root, name, create) {
            Ok(map) => {
                self.tagmaps.insert(name.to_string(), map);
                Ok(true)
            }
            Err(Error::TagNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn tagmap_mut(&mut self, name: &str) -> Result<&mut Tagmap> {
        self.load_tagmap(name, true)?;
        self.tagmaps
            .get_mut(name)
            .ok_or_else(|| Error::Bug(format!("tagmap '{}' missing after load", name)))
    }

    fn bitmap(&mut self, name: &str) -> Result<Option<Wahl>> {
        if !self.load_tagmap(name, false)? {
            return Ok(None);
        }
        Ok(self.tagmaps.get(name).map(|m| m.bitmap().clone()))
    }

    /// Pre-load tagmaps; in write mode missing ones are created.
    pub fn using_tags<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        self.check_open()?;
        let create = self.mode == Mode::Write;
        for name in query_tags(names)? {
            self.load_tagmap(&name, create)?;
        }
        Ok(())
    }

    /// Index inline text. Returns the card and whether the object is new.
    pub fn index_text<S: AsRef<str>>(&mut self, text: &str, tags: &[S]) -> Result<(Card, bool)> {
        self.check_write("index_text")?;
        let tags = user_tags(tags)?;
        let oid = Oid::for_text(text);
        let (card, is_new) = match self.cards.find(&oid)? {
            Some(card) => (card, false),
            None => (Card::new_text(oid, text), true),
        };
        self.ingest(card, is_new, &tags, None)
    }

    /// Index the file at `path`. The content is hashed; the absolute path is
    /// recorded on the card.
    pub fn index_file<S: AsRef<str>>(&mut self, path: &Path, tags: &[S]) -> Result<(Card, bool)> {
        self.check_write("index_file")?;
        let tags = user_tags(tags)?;
        let abs = path.canonicalize().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::InvalidArg(format!("no such file: {}", path.display()))
            }
            _ => e.into(),
        })?;
        if !abs.is_file() {
            return Err(Error::InvalidArg(format!(
                "not a regular file: {}",
                abs.display()
            )));
        }
        let oid = Oid::for_reader(std::fs::File::open(&abs)?)?;

        let (card, is_new) = match self.cards.find(&oid)? {
            Some(mut card) => {
                if card.kind() != ObjectType::File {
                    return Err(Error::InvalidOp(format!(
                        "object {} is already archived as {}",
                        oid.fingerprint(12),
                        card.kind()
                    )));
                }
                card.add_path(&abs)?;
                (card, false)
            }
            None => (Card::new_file(oid, &abs)?, true),
        };
        let details = FileDetails::new(&abs);
        self.ingest(card, is_new, &tags, Some(details))
    }

    fn ingest(
        &mut self,
        mut card: Card,
        is_new: bool,
        tags: &[String],
        details: Option<FileDetails>,
    ) -> Result<(Card, bool)> {
        let mut added = card.add_tag(tags)?;

        let today = chrono::Local::now().date_naive();
        let mut sys = systemic::tags_for(card.kind(), details.as_ref(), today);
        if !is_new {
            // The ingest day is the day of first ingest.
            sys.retain(|t| !systemic::is_day_tag(t));
        }
        added.extend(card.add_systemic(&sys)?);

        // A key is assigned only once the tags are known to fit the card.
        if is_new {
            let key = self.objects.add_object(card.oid())?;
            self.objects.flush()?;
            card.set_key(key)?;
        } else if card.undelete() {
            tracing::info!(oid = %card.oid().fingerprint(12), "restoring deleted object");
        }

        self.cards.save(&mut card)?;

        let key = card.key();
        for name in &added {
            self.associate(name, key)?;
        }
        tracing::debug!(
            oid = %card.oid().fingerprint(12),
            key,
            is_new,
            new_tags = added.len(),
            "indexed object"
        );
        Ok((card, is_new))
    }

    fn associate(&mut self, name: &str, key: u64) -> Result<()> {
        self.dict.add(name)?;
        self.dict.incr_refcnt(name)?;
        self.tagmap_mut(name)?.update(&[key])?;
        Ok(())
    }

    fn dissociate(&mut self, name: &str, key: u64) -> Result<()> {
        if self.dict.contains(name) {
            self.dict.decr_refcnt(name)?;
        }
        if self.load_tagmap(name, false)? {
            self.tagmap_mut(name)?.clear(&[key])?;
        }
        Ok(())
    }

    /// Run a single-list select.
    ///
    /// | Selection | Result |
    /// |-----------|--------|
    /// | `All` | objects carrying every tag; an unknown tag gives nothing |
    /// | `Any` | objects carrying at least one tag |
    /// | `None` | objects carrying none of the tags |
    pub fn select<S: AsRef<str>>(&mut self, selection: Selection, tags: &[S]) -> Result<Vec<Oid>> {
        self.check_open()?;
        let tags = query_tags(tags)?;
        match selection {
            Selection::All => {
                let Some(bitmap) = self.and_of(&tags)? else {
                    return Ok(Vec::new());
                };
                self.objects.get_oids(&to_keys(&bitmap))
            }
            Selection::Any => {
                let bitmap = self.or_of(&tags)?;
                self.objects.get_oids(&to_keys(&bitmap))
            }
            Selection::None => {
                let bitmap = self.or_of(&tags)?;
                self.objects.get_oids_excluding(&to_keys(&bitmap))
            }
        }
    }

    /// AND of the named bitmaps. `None` when a tag has no tagmap. An empty
    /// list selects every object.
    fn and_of(&mut self, tags: &[String]) -> Result<Option<Wahl>> {
        let mut acc: Option<Wahl> = None;
        for name in tags {
            let Some(bitmap) = self.bitmap(name)? else {
                return Ok(None);
            };
            acc = Some(match acc {
                Some(a) => &a & &bitmap,
                None => bitmap,
            });
        }
        Ok(Some(acc.unwrap_or_else(|| Wahl::ones(self.objects.object_count()))))
    }

    fn or_of(&mut self, tags: &[String]) -> Result<Wahl> {
        let mut acc = Wahl::new();
        for name in tags {
            if let Some(bitmap) = self.bitmap(name)? {
                acc = &acc | &bitmap;
            }
        }
        Ok(acc)
    }

    /// Evaluate a full query: `AND(all) ∩ OR(any)`, minus `OR(exclude)`.
    /// With no `all` or `any` tags the include side is every object.
    pub fn query(&mut self, query: &Query) -> Result<Vec<Oid>> {
        self.check_open()?;
        let all: Vec<String> = query.all.iter().cloned().collect();
        let any: Vec<String> = query.any.iter().cloned().collect();
        let exclude: Vec<String> = query.exclude.iter().cloned().collect();

        let include = match (all.is_empty(), any.is_empty()) {
            (true, true) => Wahl::ones(self.objects.object_count()),
            (false, true) => match self.and_of(&all)? {
                Some(b) => b,
                None => return Ok(Vec::new()),
            },
            (true, false) => self.or_of(&any)?,
            (false, false) => {
                let Some(a) = self.and_of(&all)? else {
                    return Ok(Vec::new());
                };
                &a & &self.or_of(&any)?
            }
        };
        let result = if exclude.is_empty() {
            include
        } else {
            include.bitwise(BitOp::AndNot, &self.or_of(&exclude)?)
        };
        self.objects.get_oids(&to_keys(&result))
    }

    /// Cards for `oids`, dropping soft-deleted objects unless asked not to.
    pub fn cards_for(&self, oids: &[Oid], include_deleted: bool) -> Result<Vec<Card>> {
        self.check_open()?;
        let mut out = Vec::with_capacity(oids.len());
        for oid in oids {
            let card = self.cards.load(oid)?;
            if include_deleted || !card.is_deleted() {
                out.push(card);
            }
        }
        Ok(out)
    }

    pub fn card(&self, oid: &Oid) -> Result<Card> {
        self.check_open()?;
        self.cards.load(oid)
    }

    /// Resolve a full OID or a unique hex prefix of at least
    /// [`MIN_PREFIX_LEN`] digits.
    pub fn resolve_oid(&self, text: &str) -> Result<Oid> {
        self.check_open()?;
        let text = text.trim().to_lowercase();
        if text.len() == 64 {
            return Ok(Oid::from_hex(&text)?);
        }
        if text.len() < MIN_PREFIX_LEN || !text.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidArg(format!(
                "'{}' is not an oid or a hex prefix of at least {} digits",
                text, MIN_PREFIX_LEN
            )));
        }
        let matches = self.objects.find_prefix(&text)?;
        match matches.as_slice() {
            [] => Err(Error::ObjectNotFound(text)),
            [(_, oid)] => Ok(*oid),
            _ => Err(Error::InvalidArg(format!(
                "prefix '{}' is ambiguous ({} objects)",
                text,
                matches.len()
            ))),
        }
    }

    /// Add and remove user tags on an existing object. Returns the names
    /// actually added and removed.
    pub fn tag_object<A: AsRef<str>, R: AsRef<str>>(
        &mut self,
        oid: &Oid,
        add: &[A],
        remove: &[R],
    ) -> Result<(Vec<String>, Vec<String>)> {
        self.check_write("tag_object")?;
        let add = user_tags(add)?;
        let remove = user_tags(remove)?;
        let mut card = self.cards.load(oid)?;
        let added = card.add_tag(&add)?;
        let removed = card.remove_tag(&remove);
        self.cards.save(&mut card)?;

        let key = card.key();
        for name in &added {
            self.associate(name, key)?;
        }
        for name in &removed {
            self.dissociate(name, key)?;
        }
        Ok((added, removed))
    }

    /// Apply a card-level edit. Returns whether the card changed.
    pub fn update_object(&mut self, oid: &Oid, op: UpdateOp) -> Result<bool> {
        self.check_write("update_object")?;
        let mut card = self.cards.load(oid)?;
        let changed = match op {
            UpdateOp::Lock => card.lock(),
            UpdateOp::Unlock => card.unlock(),
            UpdateOp::RemovePath(path) => card.remove_path(&path)?,
        };
        self.cards.save(&mut card)?;
        Ok(changed)
    }

    /// Soft-delete one object. Returns whether its state changed.
    pub fn delete_object(&mut self, oid: &Oid) -> Result<bool> {
        self.check_write("delete_object")?;
        let mut card = self.cards.load(oid)?;
        let changed = card.mark_deleted()?;
        self.cards.save(&mut card)?;
        Ok(changed)
    }

    /// Soft-delete every object carrying all of `tags`. Locked objects are
    /// skipped. Returns the OIDs whose state changed.
    pub fn delete_objects_by_tag<S: AsRef<str>>(&mut self, tags: &[S]) -> Result<Vec<Oid>> {
        self.check_write("delete_objects_by_tag")?;
        if tags.is_empty() {
            return Err(Error::InvalidArg("no tags given".to_string()));
        }
        let mut deleted = Vec::new();
        for oid in self.select(Selection::All, tags)? {
            match self.delete_object(&oid) {
                Ok(true) => deleted.push(oid),
                Ok(false) => {}
                Err(Error::InvalidOp(reason)) => {
                    tracing::warn!(oid = %oid.fingerprint(12), %reason, "skipping");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(deleted)
    }

    /// Expected tag → keys mapping derived from the cards reachable from the
    /// object index. Keys whose card is missing are returned separately.
    fn expected_tags(&self) -> Result<(BTreeMap<String, BTreeSet<u64>>, Vec<(u64, Oid)>, Vec<Card>)> {
        let mut expected: BTreeMap<String, BTreeSet<u64>> = BTreeMap::new();
        let mut missing = Vec::new();
        let mut cards = Vec::new();
        for (key, oid) in self.objects.entries()? {
            match self.cards.find(&oid)? {
                Some(card) => {
                    for name in card.all_tags() {
                        expected.entry(name.clone()).or_default().insert(key);
                    }
                    cards.push(card);
                }
                None => missing.push((key, oid)),
            }
        }
        Ok((expected, missing, cards))
    }

    /// Cross-check the object index, cards, tagmaps and tag dictionary.
    pub fn verify(&mut self) -> Result<VerifyReport> {
        self.check_open()?;
        let mut report = VerifyReport {
            objects: self.objects.object_count(),
            ..Default::default()
        };

        let (expected, missing, cards) = self.expected_tags()?;
        report.cards = cards.len() as u64;
        for (key, oid) in &missing {
            report
                .problems
                .push(format!("key {}: no card for {}", key, oid.fingerprint(12)));
        }
        let indexed: HashMap<Oid, u64> = self
            .objects
            .entries()?
            .into_iter()
            .map(|(k, o)| (o, k))
            .collect();
        for card in &cards {
            let fp = card.oid().fingerprint(12);
            match indexed.get(card.oid()) {
                Some(&key) if key == card.key() => {}
                Some(&key) => report.problems.push(format!(
                    "{}: card key {} but object index key {}",
                    fp,
                    card.key(),
                    key
                )),
                None => report.problems.push(format!("{}: not in object index", fp)),
            }
        }
        for oid in self.cards.oids()? {
            if !indexed.contains_key(&oid) {
                report
                    .problems
                    .push(format!("{}: orphan card", oid.fingerprint(12)));
            }
        }

        let mut names: BTreeSet<String> = expected.keys().cloned().collect();
        names.extend(self.dict.iter().map(|e| e.name.clone()));
        for name in &names {
            report.tags += 1;
            let want = expected.get(name).cloned().unwrap_or_default();
            match self.dict.get(name) {
                None => report
                    .problems
                    .push(format!("tag '{}': missing from dictionary", name)),
                Some(entry) if entry.refcnt as usize != want.len() => {
                    report.problems.push(format!(
                        "tag '{}': refcount {} but {} objects",
                        name,
                        entry.refcnt,
                        want.len()
                    ))
                }
                Some(_) => {}
            }
            let have: BTreeSet<u64> = match self.bitmap(name)? {
                Some(bitmap) => to_keys(&bitmap).into_iter().collect(),
                None if want.is_empty() => continue,
                None => {
                    report.problems.push(format!("tag '{}': no tagmap", name));
                    continue;
                }
            };
            for key in want.difference(&have) {
                report
                    .problems
                    .push(format!("tag '{}': bit for key {} not set", name, key));
            }
            for key in have.difference(&want) {
                report.problems.push(format!(
                    "tag '{}': key {} set but its card lacks the tag",
                    name, key
                ));
            }
        }
        Ok(report)
    }

    /// Recompute every tagmap and dictionary refcount from the cards, then
    /// write them out.
    pub fn rebuild_tagmaps(&mut self) -> Result<RebuildReport> {
        self.check_write("rebuild_tagmaps")?;
        let (expected, missing, _) = self.expected_tags()?;
        for (key, oid) in &missing {
            tracing::warn!(key, oid = %oid.fingerprint(12), "no card; object left untagged");
        }

        let mut names: BTreeSet<String> = expected.keys().cloned().collect();
        names.extend(self.dict.iter().map(|e| e.name.clone()));
        for name in &names {
            let keys: Vec<u64> = expected
                .get(name)
                .map(|k| k.iter().copied().collect())
                .unwrap_or_default();
            self.dict.add(name)?;
            self.dict.set_refcnt(name, keys.len() as u32)?;
            self.tagmap_mut(name)?.replace(&keys)?;
        }
        self.flush()?;
        Ok(RebuildReport {
            objects: self.objects.object_count(),
            tags: names.len() as u64,
            missing_cards: missing.len() as u64,
        })
    }

    /// Write dirty tagmaps and the dictionary without closing.
    pub fn flush(&mut self) -> Result<()> {
        self.check_open()?;
        if self.mode != Mode::Write {
            return Ok(());
        }
        self.objects.flush()?;
        for map in self.tagmaps.values_mut() {
            map.save()?;
        }
        self.dict.sync()?;
        Ok(())
    }

    /// Close the object index, then save dirty tagmaps and the dictionary.
    /// By the time this runs callers have been told their writes succeeded,
    /// so a failed save is reported as a bug.
    pub fn close(&mut self) -> Result<()> {
        if self.state == State::Closed {
            return Ok(());
        }
        self.state = State::Closed;
        let mut first_err = self.objects.close().err();

        for (name, map) in self.tagmaps.iter_mut() {
            if let Err(e) = map.save() {
                tracing::error!(tag = %name, error = %e, "failed to save tagmap");
                first_err.get_or_insert(Error::Bug(format!(
                    "failed to save tagmap '{}': {}",
                    name, e
                )));
            }
        }
        if let Err(e) = self.dict.sync() {
            first_err.get_or_insert(Error::Bug(format!(
                "failed to save tag dictionary: {}",
                e
            )));
        }
        tracing::debug!(tagmaps = self.tagmaps.len(), "closed index manager");
        self.tagmaps.clear();
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for IndexManager {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(error = %e, "failed to close index manager");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gart_core::QueryBuilder;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Repo) {
        let tmp = TempDir::new().unwrap();
        let repo = Repo::init(tmp.path()).unwrap();
        (tmp, repo)
    }

    fn writer(repo: &Repo) -> IndexManager {
        IndexManager::open(repo, Mode::Write).unwrap()
    }

    #[test]
    fn test_ingest_then_select() {
        let (_tmp, repo) = setup();
        let mut mgr = writer(&repo);
        let (a, new_a) = mgr.index_text("Salaam", &["greet", "farsi"]).unwrap();
        let (b, new_b) = mgr.index_text("Hello", &["Greet", "english"]).unwrap();
        assert!(new_a && new_b);
        assert_eq!((a.key(), b.key()), (1, 2));

        let both = mgr.select(Selection::All, &["greet"]).unwrap();
        assert_eq!(both, vec![*a.oid(), *b.oid()]);
        let farsi = mgr.select(Selection::All, &["greet", "farsi"]).unwrap();
        assert_eq!(farsi, vec![*a.oid()]);
        mgr.close().unwrap();

        let mut reader = IndexManager::open(&repo, Mode::Read).unwrap();
        assert_eq!(reader.select(Selection::Any, &["farsi", "english"]).unwrap().len(), 2);
        assert_eq!(reader.dict().get("greet").unwrap().refcnt, 2);
    }

    #[test]
    fn test_duplicate_text() {
        let (_tmp, repo) = setup();
        let mut mgr = writer(&repo);
        let (first, _) = mgr.index_text("Salaam", &["greet"]).unwrap();
        let (again, is_new) = mgr.index_text("Salaam", &["greet"]).unwrap();
        assert!(!is_new);
        assert_eq!(first.oid(), again.oid());
        assert_eq!(again.revision(), 1);
        assert_eq!(mgr.object_count(), 1);

        let (tagged, _) = mgr.index_text("Salaam", &["farsi"]).unwrap();
        assert_eq!(tagged.revision(), 2);
        assert_eq!(mgr.object_count(), 1);
    }

    #[test]
    fn test_file_with_duplicate_path() {
        let (tmp, repo) = setup();
        let file = tmp.path().join("b.txt");
        std::fs::write(&file, b"contents").unwrap();

        let mut mgr = writer(&repo);
        let (c1, _) = mgr.index_file(&file, &["t1"]).unwrap();
        let (c2, is_new) = mgr.index_file(&file, &["t2"]).unwrap();
        assert!(!is_new);
        assert_eq!(c1.oid(), c2.oid());
        assert_eq!(c2.paths().len(), 1);
        assert_eq!(c2.tags(), &["t1", "t2"]);
        assert!(c2.systemic().contains(&"systemic:ext:txt".to_string()));

        let copy = tmp.path().join("copy.md");
        std::fs::write(&copy, b"contents").unwrap();
        let (c3, _) = mgr.index_file(&copy, &[] as &[&str]).unwrap();
        assert_eq!(c3.paths().len(), 2);
        let md = mgr.select(Selection::All, &["systemic:ext:md"]).unwrap();
        assert_eq!(md, vec![*c1.oid()]);
    }

    #[test]
    fn test_select_none_is_complement() {
        let (_tmp, repo) = setup();
        let mut mgr = writer(&repo);
        let (red, _) = mgr.index_text("r", &["red"]).unwrap();
        mgr.index_text("b", &["blue"]).unwrap();
        let (both, _) = mgr.index_text("rb", &["red", "blue"]).unwrap();
        let (plain, _) = mgr.index_text("p", &["green"]).unwrap();

        // Objects carrying none of the tags.
        let none = mgr.select(Selection::None, &["blue"]).unwrap();
        assert_eq!(none, vec![*red.oid(), *plain.oid()]);
        let none = mgr.select(Selection::None, &["red", "blue"]).unwrap();
        assert_eq!(none, vec![*plain.oid()]);

        // Excluding from an include set.
        let q = QueryBuilder::new()
            .any_of(["red", "blue"])
            .exclude(["blue"])
            .build();
        assert_eq!(mgr.query(&q).unwrap(), vec![*red.oid()]);

        let q = QueryBuilder::new().all_of(["red", "blue"]).build();
        assert_eq!(mgr.query(&q).unwrap(), vec![*both.oid()]);
    }

    #[test]
    fn test_unknown_tags() {
        let (_tmp, repo) = setup();
        let mut mgr = writer(&repo);
        mgr.index_text("x", &["known"]).unwrap();
        assert!(mgr.select(Selection::All, &["known", "nope"]).unwrap().is_empty());
        assert_eq!(mgr.select(Selection::Any, &["known", "nope"]).unwrap().len(), 1);
        assert_eq!(mgr.select(Selection::None, &["nope"]).unwrap().len(), 1);
    }

    #[test]
    fn test_unconstrained_query_returns_everything() {
        let (_tmp, repo) = setup();
        let mut mgr = writer(&repo);
        mgr.index_text("a", &["t"]).unwrap();
        mgr.index_text("b", &["u"]).unwrap();
        assert_eq!(mgr.query(&Query::default()).unwrap().len(), 2);
        let q = QueryBuilder::new().of_type(ObjectType::Text).build();
        assert_eq!(mgr.query(&q).unwrap().len(), 2);
    }

    #[test]
    fn test_read_mode_and_closed_state() {
        let (_tmp, repo) = setup();
        let mut reader = IndexManager::open(&repo, Mode::Read).unwrap();
        assert!(matches!(
            reader.index_text("x", &["t"]),
            Err(Error::InvalidOp(_))
        ));
        reader.close().unwrap();
        reader.close().unwrap();
        assert!(matches!(
            reader.select(Selection::Any, &["t"]),
            Err(Error::AlreadyClosed)
        ));
    }

    #[test]
    fn test_second_writer_refused() {
        let (_tmp, repo) = setup();
        let _w = writer(&repo);
        assert!(matches!(
            IndexManager::open(&repo, Mode::Write),
            Err(Error::InvalidOp(_))
        ));
    }

    #[test]
    fn test_systemic_prefix_reserved() {
        let (_tmp, repo) = setup();
        let mut mgr = writer(&repo);
        assert!(matches!(
            mgr.index_text("x", &["systemic:type:file"]),
            Err(Error::InvalidArg(_))
        ));
    }

    #[test]
    fn test_rejected_ingest_assigns_no_key() {
        let (_tmp, repo) = setup();
        let mut mgr = writer(&repo);
        let long: Vec<String> = (0..3).map(|i| format!("{}{}", i, "t".repeat(100))).collect();
        assert!(matches!(
            mgr.index_text("Salaam", &long),
            Err(Error::InvalidArg(_))
        ));
        assert_eq!(mgr.object_count(), 0);

        let (card, is_new) = mgr.index_text("Salaam", &["greet"]).unwrap();
        assert!(is_new);
        assert_eq!(card.key(), 1);
        assert_eq!(mgr.object_count(), 1);
        assert_eq!(mgr.select(Selection::None, &["nope"]).unwrap(), vec![*card.oid()]);
        assert!(mgr.verify().unwrap().is_clean());
    }

    #[test]
    fn test_missing_dictionary_is_corrupt_in_both_modes() {
        let (_tmp, repo) = setup();
        let mut mgr = writer(&repo);
        mgr.index_text("x", &["kept"]).unwrap();
        mgr.close().unwrap();

        std::fs::remove_file(repo.tagdict_path()).unwrap();
        for mode in [Mode::Write, Mode::Read] {
            assert!(matches!(
                IndexManager::open(&repo, mode),
                Err(Error::Corrupt { .. })
            ));
        }
        assert!(!repo.tagdict_path().exists());
    }

    #[test]
    fn test_using_tags_creates_only_when_writing() {
        let (_tmp, repo) = setup();
        let root = repo.tagmaps_dir();
        let created = crate::index::tagmap::tagmap_path(&root, "early");
        let absent = crate::index::tagmap::tagmap_path(&root, "never");

        let mut reader = IndexManager::open(&repo, Mode::Read).unwrap();
        reader.using_tags(&["never"]).unwrap();
        reader.close().unwrap();
        assert!(!absent.exists());

        let mut mgr = writer(&repo);
        mgr.using_tags(&["early", "Early"]).unwrap();
        assert!(created.exists());
        assert!(matches!(mgr.using_tags(&[""]), Err(Error::InvalidArg(_))));
        mgr.close().unwrap();

        let mut reader = IndexManager::open(&repo, Mode::Read).unwrap();
        assert!(reader.select(Selection::Any, &["early"]).unwrap().is_empty());
    }

    #[test]
    fn test_tag_object_and_delete() {
        let (_tmp, repo) = setup();
        let mut mgr = writer(&repo);
        let (card, _) = mgr.index_text("doc", &["draft"]).unwrap();
        let oid = *card.oid();

        let (added, removed) = mgr.tag_object(&oid, &["final"], &["draft", "absent"]).unwrap();
        assert_eq!(added, vec!["final"]);
        assert_eq!(removed, vec!["draft"]);
        assert!(mgr.select(Selection::All, &["draft"]).unwrap().is_empty());
        assert_eq!(mgr.select(Selection::All, &["final"]).unwrap(), vec![oid]);

        assert!(mgr.update_object(&oid, UpdateOp::Lock).unwrap());
        assert!(mgr.delete_objects_by_tag(&["final"]).unwrap().is_empty());
        assert!(matches!(mgr.delete_object(&oid), Err(Error::InvalidOp(_))));
        mgr.update_object(&oid, UpdateOp::Unlock).unwrap();
        assert_eq!(mgr.delete_objects_by_tag(&["final"]).unwrap(), vec![oid]);
        assert!(!mgr.delete_object(&oid).unwrap());

        let all = mgr.select(Selection::All, &["final"]).unwrap();
        assert!(mgr.cards_for(&all, false).unwrap().is_empty());
        assert_eq!(mgr.cards_for(&all, true).unwrap().len(), 1);

        let (restored, _) = mgr.index_text("doc", &[] as &[&str]).unwrap();
        assert!(!restored.is_deleted());
    }

    #[test]
    fn test_resolve_oid() {
        let (_tmp, repo) = setup();
        let mut mgr = writer(&repo);
        let (card, _) = mgr.index_text("resolve me", &["t"]).unwrap();
        let hex = card.oid().to_hex();
        assert_eq!(mgr.resolve_oid(&hex[..8]).unwrap(), *card.oid());
        assert_eq!(mgr.resolve_oid(&hex.to_uppercase()).unwrap(), *card.oid());
        assert!(matches!(mgr.resolve_oid("ab"), Err(Error::InvalidArg(_))));
        assert!(mgr.resolve_oid("zzzz").is_err());
    }

    #[test]
    fn test_tagmaps_persist_on_close() {
        let (_tmp, repo) = setup();
        {
            let mut mgr = writer(&repo);
            mgr.index_text("persist", &["kept"]).unwrap();
        }
        let mut reader = IndexManager::open(&repo, Mode::Read).unwrap();
        assert_eq!(reader.select(Selection::All, &["kept"]).unwrap().len(), 1);
        assert!(reader.verify().unwrap().is_clean());
    }

    #[test]
    fn test_verify_and_rebuild_after_lost_tagmap() {
        let (_tmp, repo) = setup();
        let mut mgr = writer(&repo);
        mgr.index_text("one", &["x"]).unwrap();
        mgr.index_text("two", &["x", "y"]).unwrap();
        mgr.close().unwrap();

        std::fs::remove_file(crate::index::tagmap::tagmap_path(&repo.tagmaps_dir(), "x")).unwrap();
        let mut mgr = writer(&repo);
        let report = mgr.verify().unwrap();
        assert!(!report.is_clean());
        assert!(report.problems.iter().any(|p| p.contains("'x'")));

        let rebuilt = mgr.rebuild_tagmaps().unwrap();
        assert_eq!(rebuilt.objects, 2);
        assert!(mgr.verify().unwrap().is_clean());
        assert_eq!(mgr.select(Selection::All, &["x"]).unwrap().len(), 2);
    }
}
