//! `gart info`: one object's card, or repository statistics.

use anyhow::Result;
use serde::Serialize;
use walkdir::WalkDir;

use crate::index::{Card, CardData, Mode};
use crate::output::{format_bytes, format_ts, format_ts_nanos, print_json};
use crate::session::Session;

/// Repository-wide counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepoStats {
    pub root: String,
    pub objects: u64,
    pub pages: u64,
    pub text_objects: u64,
    pub file_objects: u64,
    pub deleted: u64,
    pub locked: u64,
    pub missing_cards: u64,
    pub user_tags: u64,
    pub systemic_tags: u64,
    pub size_bytes: u64,
    pub created_ns: i64,
    pub updated_ns: i64,
}

pub fn run_info(session: &Session, oid: Option<&str>) -> Result<()> {
    match oid {
        Some(oid) => show_card(session, oid),
        None => show_stats(session),
    }
}

fn show_card(session: &Session, oid: &str) -> Result<()> {
    let card: Card = session.with_manager(Mode::Read, |mgr| {
        let oid = mgr.resolve_oid(oid)?;
        Ok(mgr.card(&oid)?)
    })?;
    if session.json {
        return print_json(&card);
    }

    let mut flags = Vec::new();
    if card.is_deleted() {
        flags.push("deleted");
    }
    if card.is_locked() {
        flags.push("locked");
    }

    println!("oid:       {}", card.oid());
    println!("key:       {}", card.key());
    println!("type:      {}", card.kind());
    println!("revision:  {}", card.revision());
    println!("created:   {}", format_ts(card.created()));
    println!("updated:   {}", format_ts(card.updated()));
    if !flags.is_empty() {
        println!("flags:     {}", flags.join(", "));
    }
    println!("tags:      {}", card.tags().join(", "));
    println!("systemic:  {}", card.systemic().join(", "));
    match card.data() {
        CardData::Paths(paths) => {
            println!("paths:");
            for p in paths {
                println!("  {}", p);
            }
        }
        CardData::Text(text) => {
            println!("text:");
            for line in text.lines() {
                println!("  {}", line);
            }
        }
    }
    Ok(())
}

fn dir_size(session: &Session) -> u64 {
    WalkDir::new(session.repo.gart_dir())
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

fn show_stats(session: &Session) -> Result<()> {
    let mut stats = session.with_manager(Mode::Read, |mgr| {
        let index = mgr.object_index();
        let mut stats = RepoStats {
            root: session.repo.root().display().to_string(),
            objects: index.object_count(),
            pages: index.page_count(),
            created_ns: index.created(),
            updated_ns: index.updated(),
            ..Default::default()
        };
        for entry in mgr.dict().iter() {
            if entry.is_systemic() {
                stats.systemic_tags += 1;
            } else {
                stats.user_tags += 1;
            }
        }
        for (_, oid) in index.entries()? {
            let card = match mgr.card(&oid) {
                Ok(card) => card,
                Err(crate::error::Error::CardNotFound(_)) => {
                    stats.missing_cards += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            match card.data() {
                CardData::Paths(_) => stats.file_objects += 1,
                CardData::Text(_) => stats.text_objects += 1,
            }
            stats.deleted += card.is_deleted() as u64;
            stats.locked += card.is_locked() as u64;
        }
        Ok(stats)
    })?;
    stats.size_bytes = dir_size(session);

    if session.json {
        return print_json(&stats);
    }
    println!("gart repository: {}", stats.root);
    println!();
    println!("  Objects:     {} ({} text, {} file)", stats.objects, stats.text_objects, stats.file_objects);
    println!("  Deleted:     {}", stats.deleted);
    println!("  Locked:      {}", stats.locked);
    if stats.missing_cards > 0 {
        println!("  Missing:     {} (run `gart verify`)", stats.missing_cards);
    }
    println!("  Tags:        {} user, {} systemic", stats.user_tags, stats.systemic_tags);
    println!("  Index pages: {}", stats.pages);
    println!("  Size:        {}", format_bytes(stats.size_bytes));
    println!("  Created:     {}", format_ts_nanos(stats.created_ns));
    println!("  Updated:     {}", format_ts_nanos(stats.updated_ns));
    Ok(())
}
