//! Repository layout.
//!
//! ```text
//! <repo-root>/
//!   .gart/
//!     config.toml
//!     tags/
//!       tagdict.dat
//!     index/
//!       objects.idx
//!       cards/xx/<62 hex>.card
//!       tagmaps/xx/<14 hex>.bitmap
//! ```

use std::path::{Path, PathBuf};

use crate::config::{self, Config};
use crate::error::{Error, Result};
use crate::fs::{ensure_dir, swap_write, verify_dir};
use crate::index::object_index::ObjectIndex;
use crate::tagdict::TagDict;

/// Name of the metadata directory at the repository root.
pub const GART_DIR: &str = ".gart";

/// Environment variable naming a repository root.
pub const REPO_ENV: &str = "GART_REPO";

/// Handle to an initialized repository.
#[derive(Debug, Clone)]
pub struct Repo {
    root: PathBuf,
}

impl Repo {
    /// Create a new repository at `root`.
    pub fn init(root: &Path) -> Result<Repo> {
        ensure_dir(root)?;
        let repo = Repo {
            root: root.canonicalize()?,
        };
        if repo.gart_dir().exists() {
            return Err(Error::AlreadyExists(format!(
                "repository already initialized at {}",
                repo.root.display()
            )));
        }

        for dir in repo.dirs() {
            ensure_dir(&dir)?;
        }
        ObjectIndex::create(&repo.objects_path())?;
        TagDict::create(&repo.tagdict_path())?;
        swap_write(&repo.config_path(), Config::default().to_toml()?.as_bytes())?;

        tracing::debug!(root = %repo.root.display(), "initialized repository");
        Ok(repo)
    }

    /// Open the repository rooted exactly at `root`.
    pub fn open(root: &Path) -> Result<Repo> {
        let repo = Repo {
            root: root.to_path_buf(),
        };
        if !repo.gart_dir().is_dir() {
            return Err(Error::Usage(format!(
                "not a gart repository: {}",
                root.display()
            )));
        }
        for dir in repo.dirs() {
            verify_dir(&dir)?;
        }
        Ok(repo)
    }

    /// Open the nearest repository at or above `start`.
    pub fn discover(start: &Path) -> Result<Repo> {
        let start = start.canonicalize()?;
        for dir in start.ancestors() {
            if dir.join(GART_DIR).is_dir() {
                return Repo::open(dir);
            }
        }
        Err(Error::Usage(format!(
            "not a gart repository (or any parent): {}",
            start.display()
        )))
    }

    /// Resolve the repository from an explicit path, then `GART_REPO`, then
    /// the current directory.
    pub fn locate(explicit: Option<&Path>) -> Result<Repo> {
        if let Some(path) = explicit {
            return Repo::open(path);
        }
        if let Some(path) = std::env::var_os(REPO_ENV) {
            return Repo::open(Path::new(&path));
        }
        Repo::discover(&std::env::current_dir()?)
    }

    fn dirs(&self) -> [PathBuf; 5] {
        [
            self.gart_dir(),
            self.tags_dir(),
            self.index_dir(),
            self.cards_dir(),
            self.tagmaps_dir(),
        ]
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn gart_dir(&self) -> PathBuf {
        self.root.join(GART_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.gart_dir().join("config.toml")
    }

    pub fn tags_dir(&self) -> PathBuf {
        self.gart_dir().join("tags")
    }

    pub fn tagdict_path(&self) -> PathBuf {
        self.tags_dir().join("tagdict.dat")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.gart_dir().join("index")
    }

    pub fn objects_path(&self) -> PathBuf {
        self.index_dir().join("objects.idx")
    }

    pub fn cards_dir(&self) -> PathBuf {
        self.index_dir().join("cards")
    }

    pub fn tagmaps_dir(&self) -> PathBuf {
        self.index_dir().join("tagmaps")
    }

    pub fn config(&self) -> Result<Config> {
        config::load_config(&self.config_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_creates_layout() {
        let tmp = TempDir::new().unwrap();
        let repo = Repo::init(tmp.path()).unwrap();
        assert!(repo.objects_path().is_file());
        assert!(repo.tagdict_path().is_file());
        assert!(repo.config_path().is_file());
        assert!(repo.cards_dir().is_dir());
        assert!(repo.tagmaps_dir().is_dir());
        assert_eq!(repo.config().unwrap().display.fingerprint_len, 12);
    }

    #[test]
    fn test_init_twice_fails() {
        let tmp = TempDir::new().unwrap();
        Repo::init(tmp.path()).unwrap();
        assert!(matches!(
            Repo::init(tmp.path()),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_discover_from_subdirectory() {
        let tmp = TempDir::new().unwrap();
        let repo = Repo::init(tmp.path()).unwrap();
        let nested = tmp.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        let found = Repo::discover(&nested).unwrap();
        assert_eq!(found.root(), repo.root());
    }

    #[test]
    fn test_open_non_repo() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(Repo::open(tmp.path()), Err(Error::Usage(_))));
    }

    #[test]
    fn test_open_detects_missing_dir() {
        let tmp = TempDir::new().unwrap();
        let repo = Repo::init(tmp.path()).unwrap();
        std::fs::remove_dir_all(repo.tagmaps_dir()).unwrap();
        assert!(Repo::open(tmp.path()).is_err());
    }
}
