//! Directory expansion for `gart add --file <dir> --recursive`.
//!
//! Files are matched on their path relative to the directory being added.
//! Exclude patterns win over include patterns; the built-in excludes keep
//! VCS metadata, build output, and gart's own metadata out of the archive.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::AddConfig;

const DEFAULT_EXCLUDES: [&str; 3] = ["**/.git/**", "**/.gart/**", "**/target/**"];

/// Regular files under `root` selected by the `[add]` globs, sorted.
pub fn collect_files(root: &Path, config: &AddConfig) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("not a directory: {}", root.display());
    }
    let include_set = build_globset(&config.include_globs)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry.with_context(|| format!("walking {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let rel = path.strip_prefix(root).unwrap_or(path).to_string_lossy().to_string();
        if exclude_set.is_match(&rel) || !include_set.is_match(&rel) {
            continue;
        }
        files.push(path.to_path_buf());
    }
    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("bad glob '{}'", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let p = root.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, rel).unwrap();
    }

    fn names(root: &Path, files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_default_excludes() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "a.txt");
        touch(tmp.path(), "sub/b.md");
        touch(tmp.path(), ".git/config");
        touch(tmp.path(), ".gart/config.toml");
        touch(tmp.path(), "target/debug/x");

        let files = collect_files(tmp.path(), &AddConfig::default()).unwrap();
        assert_eq!(names(tmp.path(), &files), vec!["a.txt", "sub/b.md"]);
    }

    #[test]
    fn test_include_and_exclude_globs() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "a.txt");
        touch(tmp.path(), "b.md");
        touch(tmp.path(), "drafts/c.md");

        let config = AddConfig {
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: vec!["drafts/**".to_string()],
            follow_symlinks: false,
        };
        let files = collect_files(tmp.path(), &config).unwrap();
        assert_eq!(names(tmp.path(), &files), vec!["b.md"]);
    }

    #[test]
    fn test_not_a_directory() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "f");
        assert!(collect_files(&tmp.path().join("f"), &AddConfig::default()).is_err());
    }
}
