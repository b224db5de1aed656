//! `gart find`: tag queries.

use anyhow::Result;
use gart_core::{ObjectType, QueryBuilder};

use crate::error::Error;
use crate::index::Mode;
use crate::output::{preview, print_json};
use crate::session::Session;

#[derive(Debug, Clone, Default)]
pub struct FindArgs {
    pub all: Vec<String>,
    pub any: Vec<String>,
    pub none: Vec<String>,
    pub kind: Option<ObjectType>,
    pub ext: Option<String>,
    pub include_deleted: bool,
}

pub fn run_find(session: &Session, args: &FindArgs) -> Result<()> {
    let mut builder = QueryBuilder::new()
        .all_of(&args.all)
        .any_of(&args.any)
        .exclude(&args.none);
    if let Some(kind) = args.kind {
        builder = builder.of_type(kind);
    }
    if let Some(ext) = &args.ext {
        builder = builder.with_ext(ext);
    }
    let query = builder.build();
    tracing::debug!(?query, "running query");

    let include_deleted = args.include_deleted || session.config.find.include_deleted;
    let cards = session.with_manager(Mode::Read, |mgr| {
        if session.config.find.strict {
            let (_, undefined) = mgr.dict().select_tags(query.tags());
            if !undefined.is_empty() {
                return Err(Error::TagNotFound(undefined.join(", ")).into());
            }
        }
        let oids = mgr.query(&query)?;
        Ok(mgr.cards_for(&oids, include_deleted)?)
    })?;

    if session.json {
        return print_json(&cards);
    }
    if cards.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for card in &cards {
        let deleted = if card.is_deleted() { "  [deleted]" } else { "" };
        println!(
            "{}  {:<4}  {}{}",
            session.fingerprint(card.oid()),
            card.kind().name(),
            preview(card),
            deleted
        );
    }
    Ok(())
}
