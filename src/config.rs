//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\syncy\config.toml
//! - macOS: ~/Library/Application Support/syncy/config.toml
//! - Linux: ~/.config/syncy/config.toml
//!
//! The config file is human-readable and editable. It is loaded once at
//! startup and passed to the services that need it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::model::{Codec, CoverMode};
use crate::reconcile::RemovalPolicy;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where and how tracks are written
    pub download: DownloadConfig,

    /// Sync behaviour
    pub sync: SyncConfig,
}

/// Download and post-processing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Managed root: holds `library.json` and one folder per collection
    pub download_path: PathBuf,

    /// Scratch space for downloads before transcoding
    pub temp_path: PathBuf,

    /// Normalized cover cache
    pub cache_path: PathBuf,

    /// Filename template, e.g. `$title$ - $artist$`
    pub filename_template: String,

    pub cover_mode: CoverMode,

    pub codec: Codec,

    /// 1 (smallest) to 10 (best)
    pub encode_quality: u8,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        let music = dirs::audio_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join("Music")))
            .unwrap_or_else(|| PathBuf::from("Music"));
        let cache = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join("syncy");

        Self {
            download_path: music.join("Syncy"),
            temp_path: cache.join("tmp"),
            cache_path: cache.join("covers"),
            filename_template: "$title$ - $artist$".to_string(),
            cover_mode: CoverMode::default(),
            codec: Codec::default(),
            encode_quality: 10,
        }
    }
}

/// Sync settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Concurrent item jobs
    pub max_parallel: usize,

    /// What happens to items removed from the remote playlist
    pub removal_policy: RemovalPolicy,

    /// URL checked before talking to the remote service
    pub reachability_url: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_parallel: 2,
            removal_policy: RemovalPolicy::default(),
            reachability_url: "https://music.youtube.com".to_string(),
        }
    }
}

impl Config {
    /// Reject values the sync cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !(1..=10).contains(&self.download.encode_quality) {
            return Err(Error::config(format!(
                "download.encode_quality must be 1-10, got {}",
                self.download.encode_quality
            )));
        }
        if self.sync.max_parallel == 0 {
            return Err(Error::config("sync.max_parallel must be at least 1"));
        }
        if self.download.filename_template.trim().is_empty() {
            return Err(Error::config("download.filename_template is empty"));
        }
        Ok(())
    }
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("syncy"))
}

/// Get the full path to the config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration from the default location.
///
/// Returns default config if the file doesn't exist or can't be parsed.
pub fn load() -> Config {
    match config_path() {
        Some(path) => load_from(&path),
        None => {
            tracing::warn!(target: "syncy::config", "Could not determine config directory, using defaults");
            Config::default()
        }
    }
}

/// Load configuration from `path`.
///
/// Logs warnings but doesn't fail - we always return a usable config.
pub fn load_from(path: &Path) -> Config {
    if !path.exists() {
        tracing::info!(target: "syncy::config", "No config file found at {:?}, using defaults", path);
        return Config::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                tracing::debug!(target: "syncy::config", "Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                tracing::error!(target: "syncy::config", "Failed to parse config file {:?}: {}", path, e);
                tracing::warn!(target: "syncy::config", "Using default configuration");
                Config::default()
            }
        },
        Err(e) => {
            tracing::error!(target: "syncy::config", "Failed to read config file {:?}: {}", path, e);
            Config::default()
        }
    }
}

/// Save configuration to the default location.
pub fn save(config: &Config) -> std::result::Result<PathBuf, ConfigError> {
    let path = config_path().ok_or(ConfigError::NoConfigDir)?;
    save_to(config, &path)?;
    Ok(path)
}

/// Save configuration to `path`.
///
/// Creates the parent directory if it doesn't exist.
pub fn save_to(config: &Config, path: &Path) -> std::result::Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::CreateDir(dir.to_path_buf(), e))?;
    }

    // Serialize to pretty TOML
    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    // Write atomically (write to temp, then rename)
    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| ConfigError::Rename(temp_path, path.to_path_buf(), e))?;

    tracing::info!(target: "syncy::config", "Saved config to {:?}", path);
    Ok(())
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[download]"));
        assert!(toml.contains("[sync]"));
        assert!(toml.contains("filename_template = \"$title$ - $artist$\""));
        assert!(toml.contains("removal_policy = \"keep\""));
        config.validate().unwrap();
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.download.codec = Codec::Opus;
        config.download.cover_mode = CoverMode::Extend;
        config.sync.max_parallel = 6;
        config.sync.removal_policy = RemovalPolicy::Blacklist;

        save_to(&config, &path).unwrap();
        assert!(!path.with_extension("toml.tmp").exists());
        assert_eq!(load_from(&path), config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        // Config with only some fields
        let toml = r#"
[download]
codec = "aac"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        // Specified field is set
        assert_eq!(config.download.codec, Codec::Aac);

        // Other fields use defaults
        assert_eq!(config.download.encode_quality, 10);
        assert_eq!(config.sync.max_parallel, 2);
        assert_eq!(config.sync.removal_policy, RemovalPolicy::Keep);
    }

    #[test]
    fn test_unparseable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "download = [[[").unwrap();
        assert_eq!(load_from(&path), Config::default());
        assert_eq!(load_from(&dir.path().join("absent.toml")), Config::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.download.encode_quality = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.sync.max_parallel = 0;
        assert!(config.validate().is_err());
    }
}
