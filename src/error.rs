//! Error taxonomy for the index subsystem.
//!
//! Leaves (object index, tagmaps, cards, tag dictionary) return these typed
//! errors; the CLI layer wraps them in `anyhow` context and `main` maps the
//! innermost [`Error`] back to a category tag and process exit code.
//!
//! | Category | Exit code | Variants |
//! |----------|-----------|----------|
//! | `err` | 1 | everything recoverable |
//! | `usage` | 2 | [`Error::Usage`] |
//! | `interrupt` | 3 | [`Error::Interrupted`] |
//! | `fault` | 4 | [`Error::IoFault`] |
//! | `bug` | 4 | [`Error::Bug`] |

use std::path::PathBuf;

use gart_core::{OidError, WahlError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    #[error("{0}")]
    Usage(String),

    #[error("key {key} out of range (object count {count})")]
    OutOfRange { key: u64, count: u64 },

    #[error("tag not found: {0}")]
    TagNotFound(String),

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("card not found: {0}")]
    CardNotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid operation: {0}")]
    InvalidOp(String),

    #[error("index manager already closed")]
    AlreadyClosed,

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("corrupt file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("I/O fault: {0}")]
    IoFault(#[from] std::io::Error),

    #[error("bug: {0}")]
    Bug(String),

    #[error("interrupted")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Category tag printed in front of user-facing diagnostics.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Usage(_) => "usage",
            Error::Interrupted => "interrupt",
            Error::IoFault(_) => "fault",
            Error::Bug(_) => "bug",
            _ => "err",
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Usage(_) => 2,
            Error::Interrupted => 3,
            e if e.is_fatal() => 4,
            _ => 1,
        }
    }

    /// Faults and bugs are not recoverable by retrying the command.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::IoFault(_) | Error::Bug(_))
    }
}

impl From<OidError> for Error {
    fn from(e: OidError) -> Self {
        Error::InvalidArg(e.to_string())
    }
}

impl From<WahlError> for Error {
    fn from(e: WahlError) -> Self {
        match e {
            WahlError::BufferTooSmall { .. } => Error::Bug(e.to_string()),
            WahlError::Decode(reason) => Error::Corrupt {
                path: PathBuf::new(),
                reason,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::Usage("x".into()).exit_code(), 2);
        assert_eq!(Error::Interrupted.exit_code(), 3);
        assert_eq!(Error::Bug("x".into()).exit_code(), 4);
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert_eq!(Error::from(io).exit_code(), 4);
        assert_eq!(Error::TagNotFound("t".into()).exit_code(), 1);
        assert_eq!(Error::corrupt("/x", "crc").category(), "err");
    }

    #[test]
    fn test_only_faults_and_bugs_are_fatal() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert!(Error::from(io).is_fatal());
        assert!(Error::Bug("x".into()).is_fatal());
        assert!(!Error::corrupt("/x", "crc").is_fatal());
        assert!(!Error::Interrupted.is_fatal());
    }

    #[test]
    fn test_wahl_decode_is_corruption() {
        let e: Error = WahlError::Decode("bad".into()).into();
        assert!(matches!(e, Error::Corrupt { .. }));
    }
}
