//! `gart update` and `gart delete`.

use anyhow::Result;
use gart_core::Oid;

use crate::error::Error;
use crate::index::{Mode, UpdateOp};
use crate::interrupt;
use crate::output::print_json;
use crate::session::Session;

fn describe(op: &UpdateOp) -> String {
    match op {
        UpdateOp::Lock => "locked".to_string(),
        UpdateOp::Unlock => "unlocked".to_string(),
        UpdateOp::RemovePath(p) => format!("dropped path {}", p.display()),
    }
}

pub fn run_update(session: &Session, oid: &str, op: UpdateOp) -> Result<()> {
    let op = match op {
        // Cards record absolute paths.
        UpdateOp::RemovePath(p) if p.is_relative() => {
            UpdateOp::RemovePath(std::env::current_dir()?.join(p))
        }
        op => op,
    };
    let (oid, changed) = session.with_manager(Mode::Write, |mgr| {
        let oid = mgr.resolve_oid(oid)?;
        let changed = mgr.update_object(&oid, op.clone())?;
        Ok((oid, changed))
    })?;

    if session.json {
        return print_json(&serde_json::json!({ "oid": oid, "changed": changed }));
    }
    if changed {
        println!("{}: {}", session.fingerprint(&oid), describe(&op));
    } else {
        println!("{}: unchanged", session.fingerprint(&oid));
    }
    Ok(())
}

/// Soft-delete objects named by OID, or every object carrying all of `tags`.
pub fn run_delete(session: &Session, oids: &[String], tags: &[String]) -> Result<()> {
    if oids.is_empty() == tags.is_empty() {
        return Err(Error::Usage("pass either object ids or --tags".to_string()).into());
    }
    let deleted: Vec<Oid> = session.with_manager(Mode::Write, |mgr| {
        if !tags.is_empty() {
            return Ok(mgr.delete_objects_by_tag(tags)?);
        }
        let mut deleted = Vec::new();
        for text in oids {
            interrupt::check()?;
            let oid = mgr.resolve_oid(text)?;
            if mgr.delete_object(&oid)? {
                deleted.push(oid);
            } else if !session.json {
                println!("{}: already deleted", session.fingerprint(&oid));
            }
        }
        Ok(deleted)
    })?;

    if session.json {
        return print_json(&deleted);
    }
    for oid in &deleted {
        println!("deleted {}", session.fingerprint(oid));
    }
    if deleted.is_empty() && !tags.is_empty() {
        println!("Nothing deleted.");
    }
    Ok(())
}
