//! Process-wide interrupt flag.
//!
//! The binary's Ctrl-C handler raises the flag; long-running commands poll
//! it between objects and unwind with [`Error::Interrupted`] so the index
//! manager is closed cleanly.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

pub fn raise() {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

pub fn is_raised() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Fail with [`Error::Interrupted`] once the flag is up.
pub fn check() -> Result<()> {
    if is_raised() {
        return Err(Error::Interrupted);
    }
    Ok(())
}
