//! Filesystem configuration.
//!
//! Precedence, highest first:
//! - `ESGF_FUSE_*` environment variables
//! - a file given on the command line (`--config`)
//! - the file named by `$ESGF_FUSE_CONFIG`
//! - `./esgf-fuse.toml`
//! - built-in defaults
//!
//! ```toml
//! [cache]
//! root = "/scratch/esgf"
//! group = 1000
//!
//! [download]
//! certificate = "/home/user/.esg/credentials.pem"
//! max_concurrent = 5
//!
//! [catalogue]
//! search_url = "https://esgf-node.llnl.gov/esg-search/search"
//!
//! [mapping.project]
//! cmip5 = "CMIP5"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use esgf_catalogue::constants::DEFAULT_SEARCH_URL;
use esgf_catalogue::constants::SEARCH_TIMEOUT;
use serde::Deserialize;
use serde::Serialize;
use snafu::Snafu;
use tracing::info;
use tracing::warn;

use crate::constants::DEFAULT_MAX_CONCURRENT_DOWNLOADS;
use crate::constants::DEFAULT_OPEN_THROTTLE;
use crate::constants::DEFAULT_STALE_LOCK_AFTER;
use crate::constants::MAX_CONCURRENT_DOWNLOADS;

/// Environment variable naming a config file.
pub const CONFIG_FILE_ENV: &str = "ESGF_FUSE_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "esgf-fuse.toml";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    #[snafu(display("invalid configuration for {key}: '{value}' ({reason})"))]
    InvalidValue { key: String, value: String, reason: String },

    #[snafu(display("missing required configuration: {key} ({hint})"))]
    MissingRequired { key: String, hint: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding `ESGF_CACHE/` and `ESGF_LOG/`.
    pub root: PathBuf,
    /// Group given to log files and cache directories.
    pub group: Option<u32>,
    /// Delay before resolving on open, in milliseconds.
    pub open_throttle_ms: u64,
    /// Age after which a lock file is reclaimed; 0 disables reclamation.
    pub stale_lock_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./esgf-cache"),
            group: None,
            open_throttle_ms: DEFAULT_OPEN_THROTTLE.as_millis() as u64,
            stale_lock_secs: DEFAULT_STALE_LOCK_AFTER.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// wget executable.
    pub program: PathBuf,
    /// PEM holding the client certificate and key.
    pub certificate: Option<PathBuf>,
    pub secure_protocol: String,
    pub max_concurrent: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("wget"),
            certificate: None,
            secure_protocol: "TLSv1".to_string(),
            max_concurrent: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogueConfig {
    pub search_url: String,
    pub timeout_secs: u64,
}

impl Default for CatalogueConfig {
    fn default() -> Self {
        Self { search_url: DEFAULT_SEARCH_URL.to_string(), timeout_secs: SEARCH_TIMEOUT.as_secs() }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EsgfFsConfig {
    pub cache: CacheConfig,
    pub download: DownloadConfig,
    pub catalogue: CatalogueConfig,
    /// Per-facet value aliases: facet name -> local value -> catalogue value.
    pub mapping: BTreeMap<String, BTreeMap<String, String>>,
}

impl EsgfFsConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::InvalidValue {
            key: "config".to_string(),
            value: String::new(),
            reason: format!("failed to parse TOML: {e}"),
        })
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidValue {
            key: "config_file".to_string(),
            value: path.display().to_string(),
            reason: format!("failed to read file: {e}"),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Load defaults, then a file, then environment overrides, and validate.
    pub fn load_with_layers(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::load_toml_with_fallbacks(explicit)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn load_toml_with_fallbacks(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            info!(path = %path.display(), "loading configuration");
            return Self::from_toml_file(path);
        }

        if let Ok(config_path) = std::env::var(CONFIG_FILE_ENV) {
            let path = Path::new(&config_path);
            if path.exists() {
                info!(path = %config_path, "loading configuration from {CONFIG_FILE_ENV}");
                return Self::from_toml_file(path);
            }
            warn!(path = %config_path, "{CONFIG_FILE_ENV} set but file not found");
        }

        let local = Path::new(LOCAL_CONFIG_FILE);
        if local.exists() {
            info!(path = LOCAL_CONFIG_FILE, "loading configuration");
            return Self::from_toml_file(local);
        }

        info!("no configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Override values from `ESGF_FUSE_*` variables looked up through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("ESGF_FUSE_CACHE_ROOT") {
            self.cache.root = PathBuf::from(v);
        }
        if let Some(v) = lookup("ESGF_FUSE_CACHE_GROUP") {
            self.cache.group = Some(parse_env("ESGF_FUSE_CACHE_GROUP", &v)?);
        }
        if let Some(v) = lookup("ESGF_FUSE_OPEN_THROTTLE_MS") {
            self.cache.open_throttle_ms = parse_env("ESGF_FUSE_OPEN_THROTTLE_MS", &v)?;
        }
        if let Some(v) = lookup("ESGF_FUSE_STALE_LOCK_SECS") {
            self.cache.stale_lock_secs = parse_env("ESGF_FUSE_STALE_LOCK_SECS", &v)?;
        }
        if let Some(v) = lookup("ESGF_FUSE_WGET") {
            self.download.program = PathBuf::from(v);
        }
        if let Some(v) = lookup("ESGF_FUSE_CERTIFICATE") {
            self.download.certificate = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("ESGF_FUSE_SECURE_PROTOCOL") {
            self.download.secure_protocol = v;
        }
        if let Some(v) = lookup("ESGF_FUSE_MAX_DOWNLOADS") {
            self.download.max_concurrent = parse_env("ESGF_FUSE_MAX_DOWNLOADS", &v)?;
        }
        if let Some(v) = lookup("ESGF_FUSE_SEARCH_URL") {
            self.catalogue.search_url = v;
        }
        if let Some(v) = lookup("ESGF_FUSE_SEARCH_TIMEOUT_SECS") {
            self.catalogue.timeout_secs = parse_env("ESGF_FUSE_SEARCH_TIMEOUT_SECS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let concurrency = self.download.max_concurrent;
        if concurrency == 0 || concurrency > MAX_CONCURRENT_DOWNLOADS {
            return Err(ConfigError::InvalidValue {
                key: "download.max_concurrent".to_string(),
                value: concurrency.to_string(),
                reason: format!("must be between 1 and {MAX_CONCURRENT_DOWNLOADS}"),
            });
        }
        if self.catalogue.search_url.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "catalogue.search_url".to_string(),
                hint: "set an esg-search endpoint".to_string(),
            });
        }
        if self.catalogue.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "catalogue.timeout_secs".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.cache.root.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "cache.root".to_string(),
                hint: "set a cache directory".to_string(),
            });
        }
        Ok(())
    }

    pub fn open_throttle(&self) -> Duration {
        Duration::from_millis(self.cache.open_throttle_ms)
    }

    /// Stale lock threshold; `None` when reclamation is disabled.
    pub fn stale_lock_after(&self) -> Option<Duration> {
        (self.cache.stale_lock_secs > 0).then(|| Duration::from_secs(self.cache.stale_lock_secs))
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.catalogue.timeout_secs)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}
