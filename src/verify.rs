//! `gart verify` and `gart rebuild`.

use anyhow::{bail, Result};

use crate::index::{Mode, RebuildReport, VerifyReport};
use crate::output::print_json;
use crate::session::Session;

/// Cross-check the index. Problems are printed and make the command fail.
pub fn run_verify(session: &Session) -> Result<()> {
    let report: VerifyReport = session.with_manager(Mode::Read, |mgr| Ok(mgr.verify()?))?;

    if session.json {
        print_json(&report)?;
    } else {
        println!(
            "checked {} objects, {} cards, {} tags",
            report.objects, report.cards, report.tags
        );
        for problem in &report.problems {
            println!("  {}", problem);
        }
    }
    if !report.is_clean() {
        bail!(
            "{} problem(s) found; `gart rebuild` recomputes tagmaps from cards",
            report.problems.len()
        );
    }
    if !session.json {
        println!("OK");
    }
    Ok(())
}

/// Recompute every tagmap from the cards.
pub fn run_rebuild(session: &Session) -> Result<()> {
    let report: RebuildReport =
        session.with_manager(Mode::Write, |mgr| Ok(mgr.rebuild_tagmaps()?))?;
    if session.json {
        return print_json(&report);
    }
    println!(
        "rebuilt {} tagmaps over {} objects",
        report.tags, report.objects
    );
    if report.missing_cards > 0 {
        println!("  {} objects have no card and were left untagged", report.missing_cards);
    }
    Ok(())
}
