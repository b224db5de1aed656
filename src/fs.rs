//! Filesystem primitives.
//!
//! Every gart artifact except the memory-mapped object index is replaced
//! wholesale through [`swap_write`]: the new contents go to a hidden
//! `.<name>.swp` sibling, are fsynced, and are renamed over the original;
//! the containing directory is then fsynced so the rename itself is durable.
//! A crash at any point leaves either the old file or the new one, never a
//! mix. Stale swap files from an earlier crash are simply overwritten.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Permission bits for directories created by gart.
pub const DIR_MODE: u32 = 0o755;

/// Permission bits for files created by gart.
pub const FILE_MODE: u32 = 0o644;

/// Path of the swap file used when replacing `path`.
pub fn swap_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.swp", name))
}

/// Open options for a new file with gart's permission bits.
pub fn create_options() -> OpenOptions {
    let mut opts = OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(FILE_MODE);
    }
    opts
}

/// Atomically replace `path` with `bytes`.
pub fn swap_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let swp = swap_path(path);
    if swp.exists() {
        tracing::warn!(swap = %swp.display(), "overwriting stale swap file");
    }

    {
        let mut file = create_options().open(&swp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&swp, path)?;
    sync_parent(path)?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "swap-renamed");
    Ok(())
}

/// Fsync the directory holding `path` so a completed rename survives a crash.
pub fn sync_parent(path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    #[cfg(unix)]
    File::open(parent)?.sync_all()?;
    #[cfg(not(unix))]
    let _ = parent;
    Ok(())
}

/// Read an entire file. A missing file maps to `Ok(None)`.
pub fn read_full(path: &Path) -> Result<Option<Vec<u8>>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(Some(buf))
}

/// Create `path` and any missing parents with [`DIR_MODE`].
pub fn ensure_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder.create(path)?;
    Ok(())
}

/// Fail unless `path` is an existing directory.
pub fn verify_dir(path: &Path) -> Result<()> {
    match fs::metadata(path) {
        Ok(m) if m.is_dir() => Ok(()),
        Ok(_) => Err(Error::InvalidArg(format!(
            "not a directory: {}",
            path.display()
        ))),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::InvalidArg(format!(
            "missing directory: {}",
            path.display()
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Current wall-clock time as unix nanoseconds.
pub fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Current wall-clock time as unix seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
