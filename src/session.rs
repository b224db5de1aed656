//! Per-invocation state shared by the CLI commands: the located
//! repository, its configuration, and the output format.

use std::path::Path;

use anyhow::Result;
use gart_core::Oid;

use crate::config::Config;
use crate::index::{IndexManager, Mode};
use crate::repo::Repo;

#[derive(Debug, Clone)]
pub struct Session {
    pub repo: Repo,
    pub config: Config,
    pub json: bool,
}

impl Session {
    /// Locate the repository (see [`Repo::locate`]) and load its config.
    pub fn open(explicit: Option<&Path>, json: bool) -> crate::error::Result<Self> {
        let repo = Repo::locate(explicit)?;
        let config = repo.config()?;
        Ok(Self { repo, config, json })
    }

    pub fn fingerprint(&self, oid: &Oid) -> String {
        oid.fingerprint(self.config.display.fingerprint_len)
    }

    /// Open the index manager, run `f`, and close the manager whether or
    /// not `f` succeeded. An error from `f` takes precedence.
    pub fn with_manager<T, F>(&self, mode: Mode, f: F) -> Result<T>
    where
        F: FnOnce(&mut IndexManager) -> Result<T>,
    {
        let mut mgr = IndexManager::open(&self.repo, mode)?;
        let result = f(&mut mgr);
        let closed = mgr.close();
        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                tracing::error!(error = %close_err, "close failed after error");
                Err(e)
            }
        }
    }
}
