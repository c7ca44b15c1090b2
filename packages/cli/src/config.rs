//! TOML configuration for the `incident_hub` binary.
//!
//! The file is looked up in order: the `--config` flag, the
//! `INCIDENT_HUB_CONFIG` environment variable, then `incident_hub.toml` in
//! the working directory. With none of those present the built-in defaults
//! apply. Every key is optional.
//!
//! ```toml
//! [dedup]
//! max_distance_m = 100.0
//! min_text_similarity = 0.7
//!
//! [matcher]
//! radii_m = [100, 250, 500]
//!
//! [gtfs]
//! dir = "data/gtfs"
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use incident_hub_dedup::DedupConfig;
use incident_hub_gtfs_models::{GtfsFilesConfig, LoaderConfig, MatcherConfig};
use serde::{Deserialize, Serialize};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "INCIDENT_HUB_CONFIG";

/// Environment variable overriding `[gtfs] dir`.
pub const GTFS_DIR_ENV: &str = "INCIDENT_HUB_GTFS_DIR";

/// Config file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "incident_hub.toml";

/// Errors loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        /// Path of the config file.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML or has mistyped values.
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        /// Path of the config file.
        path: String,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// A value is out of range.
    #[error("Invalid [{section}] config: {message}")]
    Invalid {
        /// Section holding the bad value.
        section: &'static str,
        /// What is wrong.
        message: String,
    },
}

/// All settings, one section per component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Duplicate detection thresholds.
    pub dedup: DedupConfig,
    /// Streaming loader limits.
    pub loader: LoaderConfig,
    /// Route matcher radii and shape source choice.
    pub matcher: MatcherConfig,
    /// Static transit table locations.
    pub gtfs: GtfsFilesConfig,
}

impl HubConfig {
    /// Loads configuration using the flag, the process environment and the
    /// working directory, then validates it.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::Io`] if a named config file cannot be read
    /// * [`ConfigError::Parse`] if the file is not valid TOML
    /// * [`ConfigError::Invalid`] if a value is out of range
    pub fn load(flag: Option<&Path>) -> Result<Self, ConfigError> {
        let path = resolve_path(
            flag,
            std::env::var_os(CONFIG_ENV),
            Path::new(DEFAULT_CONFIG_FILE),
        );
        let mut config = match path {
            Some(path) => {
                log::info!("Loading config from {}", path.display());
                Self::from_file(&path)?
            }
            None => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        };
        config.apply_gtfs_dir_override(std::env::var_os(GTFS_DIR_ENV));
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file without validating it.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::Io`] if the file cannot be read
    /// * [`ConfigError::Parse`] if the file is not valid TOML
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&contents, &path.display().to_string())
    }

    /// Parses TOML text. `label` names the source in errors.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::Parse`] if `contents` is not valid TOML
    pub fn parse(contents: &str, label: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: label.to_string(),
            source: e,
        })
    }

    /// Points the GTFS section at `dir` when set and non-empty.
    pub fn apply_gtfs_dir_override(&mut self, dir: Option<OsString>) {
        if let Some(dir) = dir.filter(|d| !d.is_empty()) {
            log::debug!("GTFS directory overridden by {GTFS_DIR_ENV}");
            self.gtfs.dir = PathBuf::from(dir);
        }
    }

    /// Checks every section.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::Invalid`] naming the first section with a bad value
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.dedup
            .validate()
            .map_err(|message| ConfigError::Invalid {
                section: "dedup",
                message,
            })?;
        self.loader
            .validate()
            .map_err(|message| ConfigError::Invalid {
                section: "loader",
                message,
            })?;
        self.matcher
            .validate()
            .map_err(|message| ConfigError::Invalid {
                section: "matcher",
                message,
            })
    }
}

/// Picks the config file: the flag, then the environment variable, then
/// `fallback` if it exists.
fn resolve_path(flag: Option<&Path>, env: Option<OsString>, fallback: &Path) -> Option<PathBuf> {
    if let Some(path) = flag {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env.filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    fallback.is_file().then(|| fallback.to_path_buf())
}
