//! `gart tag` and `gart list`: retag objects and inspect the dictionary.

use anyhow::Result;

use crate::error::Error;
use crate::index::Mode;
use crate::output::print_json;
use crate::session::Session;
use crate::tagdict::TagEntry;

pub fn run_tag(session: &Session, oid: &str, add: &[String], remove: &[String]) -> Result<()> {
    if add.is_empty() && remove.is_empty() {
        return Err(Error::Usage("nothing to do: pass --add and/or --remove".to_string()).into());
    }
    let (oid, added, removed) = session.with_manager(Mode::Write, |mgr| {
        let oid = mgr.resolve_oid(oid)?;
        let (added, removed) = mgr.tag_object(&oid, add, remove)?;
        Ok((oid, added, removed))
    })?;

    if session.json {
        return print_json(&serde_json::json!({
            "oid": oid,
            "added": added,
            "removed": removed,
        }));
    }
    let changes: Vec<String> = added
        .iter()
        .map(|t| format!("+{}", t))
        .chain(removed.iter().map(|t| format!("-{}", t)))
        .collect();
    if changes.is_empty() {
        println!("{}: unchanged", session.fingerprint(&oid));
    } else {
        println!("{}: {}", session.fingerprint(&oid), changes.join(" "));
    }
    Ok(())
}

pub fn run_list(session: &Session, include_systemic: bool) -> Result<()> {
    let entries: Vec<TagEntry> = session.with_manager(Mode::Read, |mgr| {
        Ok(mgr
            .dict()
            .iter()
            .filter(|e| include_systemic || !e.is_systemic())
            .cloned()
            .collect())
    })?;

    if session.json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("No tags.");
        return Ok(());
    }
    println!("{:>6} {:>8}  {}", "ID", "OBJECTS", "NAME");
    for e in &entries {
        println!("{:>6} {:>8}  {}", e.id, e.refcnt, e.name);
    }
    Ok(())
}
