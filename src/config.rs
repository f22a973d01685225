//! Configuration file parser for ~/.config/feedport/config.toml.
//!
//! The config file is optional. A missing or empty file yields
//! `Config::default()`, and unknown keys are logged as warnings rather than
//! rejected.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::feed::OpmlOptions;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A value parsed but cannot be used.
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// ```toml
/// database_path = "/var/lib/feedport/feeds.db"
///
/// [opml]
/// deprecated_link_prefix = "http://news.google.com/news?"
/// full_text_attribute = "retrieveFullText"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Overrides `<config dir>/feeds.db`. `--db` takes precedence.
    pub database_path: Option<PathBuf>,

    /// Names used when reading and writing OPML.
    pub opml: OpmlOptions,
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 2] = ["database_path", "opml"];
    const KNOWN_OPML_KEYS: [&'static str; 2] = ["deprecated_link_prefix", "full_text_attribute"];

    /// Load configuration from a TOML file.
    ///
    /// A missing, empty, or whitespace-only file gives the defaults. Unknown
    /// keys are logged and ignored.
    ///
    /// # Errors
    ///
    /// `TooLarge` above 1 MB, `Parse` for bad TOML or mistyped values, and
    /// `Invalid` when `[opml]` names an attribute the encoder cannot write.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let Some(content) = Self::read_file(path)? else {
            tracing::debug!(path = %path.display(), "Using default configuration");
            return Ok(Self::default());
        };

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }

        let config: Config = toml::from_str(&content)?;
        config.opml.validate().map_err(ConfigError::Invalid)?;

        tracing::info!(
            path = %path.display(),
            full_text_attribute = %config.opml.full_text_attribute,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// File contents, or `None` when there is nothing to parse.
    fn read_file(path: &Path) -> Result<Option<String>, ConfigError> {
        // SEC-014: size is checked before the file is read
        let len = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        if len > Self::MAX_FILE_SIZE {
            return Err(ConfigError::TooLarge(format!(
                "{} is {} bytes, the limit is {}",
                path.display(),
                len,
                Self::MAX_FILE_SIZE
            )));
        }

        match std::fs::read_to_string(path) {
            Ok(content) if content.trim().is_empty() => Ok(None),
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::Io(e)),
        }
    }
}

fn warn_unknown_keys(raw: &toml::Table) {
    for key in raw.keys() {
        if !Config::KNOWN_KEYS.contains(&key.as_str()) {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
        }
    }
    if let Some(opml) = raw.get("opml").and_then(toml::Value::as_table) {
        for key in opml.keys() {
            if !Config::KNOWN_OPML_KEYS.contains(&key.as_str()) {
                tracing::warn!(key = %format!("opml.{key}"), "Unknown key in config file, ignoring");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
