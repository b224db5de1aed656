//! Repository configuration.
//!
//! Read from `<repo>/.gart/config.toml`. Every section and field carries a
//! serde default, so an empty or partial file is valid and `init` writes
//! the defaults out in full for users to edit.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub add: AddConfig,
    #[serde(default)]
    pub find: FindConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Settings for `gart add --file <dir>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for AddConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindConfig {
    /// Fail when a query names a tag the dictionary has never seen.
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_fingerprint_len")]
    pub fingerprint_len: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            fingerprint_len: default_fingerprint_len(),
        }
    }
}

fn default_fingerprint_len() -> usize {
    12
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Config {
    /// Render as TOML for `init`.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Bug(format!("config serialize: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if !(4..=64).contains(&self.display.fingerprint_len) {
            return Err(Error::InvalidArg(
                "display.fingerprint_len must be in [4, 64]".to_string(),
            ));
        }
        match self.log.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" | "off" => {}
            other => {
                return Err(Error::InvalidArg(format!(
                    "unknown log.level '{}': must be off, error, warn, info, debug, or trace",
                    other
                )))
            }
        }
        for pattern in self.add.include_globs.iter().chain(&self.add.exclude_globs) {
            globset::Glob::new(pattern)
                .map_err(|e| Error::InvalidArg(format!("bad glob '{}': {}", pattern, e)))?;
        }
        Ok(())
    }
}

/// Load and validate a config file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = match crate::fs::read_full(path)? {
        Some(bytes) => String::from_utf8(bytes).map_err(|_| {
            Error::InvalidArg(format!("config is not UTF-8: {}", path.display()))
        })?,
        None => return Ok(Config::default()),
    };

    let config: Config = toml::from_str(&content).map_err(|e| {
        Error::InvalidArg(format!("failed to parse {}: {}", path.display(), e))
    })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let cfg = load_config(&tmp.path().join("config.toml")).unwrap();
        assert_eq!(cfg.display.fingerprint_len, 12);
        assert_eq!(cfg.add.include_globs, vec!["**/*"]);
        assert!(!cfg.find.strict);
    }

    #[test]
    fn test_partial_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[find]\nstrict = true\n").unwrap();
        let cfg = load_config(&path).unwrap();
        assert!(cfg.find.strict);
        assert_eq!(cfg.log.level, "warn");
    }

    #[test]
    fn test_defaults_round_trip() {
        let text = Config::default().to_toml().unwrap();
        let cfg: Config = toml::from_str(&text).unwrap();
        assert_eq!(cfg.display.fingerprint_len, 12);
    }

    #[test]
    fn test_validation() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[display]\nfingerprint_len = 2\n").unwrap();
        assert!(matches!(load_config(&path), Err(Error::InvalidArg(_))));

        std::fs::write(&path, "[log]\nlevel = \"loud\"\n").unwrap();
        assert!(load_config(&path).is_err());

        std::fs::write(&path, "[add]\ninclude_globs = [\"a[\"]\n").unwrap();
        assert!(load_config(&path).is_err());
    }
}
