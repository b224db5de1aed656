//! `gart add`: ingest inline text or files.

use std::path::PathBuf;

use anyhow::{Context, Result};
use gart_core::{ObjectType, Oid};
use serde::Serialize;

use crate::error::Error;
use crate::index::{Card, Mode};
use crate::interrupt;
use crate::session::Session;
use crate::walk::collect_files;

/// What to ingest.
#[derive(Debug, Clone)]
pub enum AddSource {
    Text(String),
    Files { paths: Vec<PathBuf>, recursive: bool },
}

/// One ingested object, as reported to the user.
#[derive(Debug, Clone, Serialize)]
pub struct AddResult {
    pub status: &'static str,
    pub oid: Oid,
    pub key: u64,
    #[serde(rename = "type")]
    pub kind: ObjectType,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl AddResult {
    fn new(card: &Card, is_new: bool, path: Option<String>) -> Self {
        Self {
            status: if is_new { "new" } else { "dup" },
            oid: *card.oid(),
            key: card.key(),
            kind: card.kind(),
            tags: card.tags().to_vec(),
            path,
        }
    }
}

/// Expand directories into the files they contain.
fn expand(session: &Session, paths: &[PathBuf], recursive: bool) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for path in paths {
        if path.is_dir() {
            if !recursive {
                return Err(Error::Usage(format!(
                    "{} is a directory (use --recursive)",
                    path.display()
                ))
                .into());
            }
            out.extend(collect_files(path, &session.config.add)?);
        } else {
            out.push(path.clone());
        }
    }
    Ok(out)
}

pub fn run_add(session: &Session, source: AddSource, tags: &[String]) -> Result<()> {
    let targets = match &source {
        AddSource::Text(_) => Vec::new(),
        AddSource::Files { paths, recursive } => expand(session, paths, *recursive)?,
    };

    let report = |r: &AddResult| {
        if !session.json {
            let path = r.path.as_deref().map(|p| format!("  {}", p)).unwrap_or_default();
            println!(
                "{}  {}  key={}{}",
                r.status,
                session.fingerprint(&r.oid),
                r.key,
                path
            );
        }
    };

    let results = session.with_manager(Mode::Write, |mgr| {
        let mut results = Vec::new();
        if let AddSource::Text(text) = &source {
            let (card, is_new) = mgr.index_text(text, tags)?;
            let r = AddResult::new(&card, is_new, None);
            report(&r);
            results.push(r);
        }
        for path in &targets {
            interrupt::check()?;
            let (card, is_new) = mgr
                .index_file(path, tags)
                .with_context(|| format!("adding {}", path.display()))?;
            let r = AddResult::new(&card, is_new, Some(path.display().to_string()));
            report(&r);
            results.push(r);
        }
        tracing::info!(objects = results.len(), "add finished");
        Ok(results)
    })?;

    if session.json {
        crate::output::print_json(&results)?;
    }
    Ok(())
}
