//! Configuration types for the worker and the hosting process.

use std::path::{Path, PathBuf};

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::manifest::AssetManifest;

/// Cache bucket name used by the shipped worker.
pub const DEFAULT_CACHE_NAME: &str = "pf1-spell-search-pwa";

/// Immutable configuration handed to a worker at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Name of the cache bucket. Changing it orphans the old bucket.
    pub cache_name: String,
    /// Assets to pre-cache on install.
    pub files: AssetManifest,
    /// Maximum number of asset requests in flight during install.
    pub install_concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            files: AssetManifest::default(),
            install_concurrency: 4,
        }
    }
}

impl WorkerConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache bucket name.
    #[must_use]
    pub fn with_cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = name.into();
        self
    }

    /// Sets the asset manifest.
    #[must_use]
    pub fn with_files(mut self, files: AssetManifest) -> Self {
        self.files = files;
        self
    }

    /// Sets the install concurrency. Zero is treated as one.
    #[must_use]
    pub const fn with_install_concurrency(mut self, concurrency: usize) -> Self {
        self.install_concurrency = concurrency;
        self
    }
}

/// HTTP client tuning for network fallbacks and installs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Seconds an idle pooled connection is kept.
    pub pool_idle_timeout_secs: u64,
    /// Idle connections kept per host.
    pub pool_max_idle_per_host: usize,
    /// TCP keepalive interval in seconds.
    pub tcp_keepalive_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            pool_idle_timeout_secs: 60,
            pool_max_idle_per_host: 8,
            tcp_keepalive_secs: 30,
        }
    }
}

/// Offline-first front end settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Origin the app is served from; also the worker scope.
    pub upstream: String,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9724,
            upstream: "http://127.0.0.1:8080/".to_string(),
        }
    }
}

impl ServeConfig {
    /// Parses the upstream origin.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if `upstream` is not an absolute URL.
    pub fn upstream_url(&self) -> Result<Url> {
        Url::parse(&self.upstream).map_err(|e| Error::InvalidUrl {
            url: self.upstream.clone(),
            reason: e.to_string(),
        })
    }
}

/// Where cache buckets are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Root directory of the on-disk cache storage.
    pub cache_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
        }
    }
}

/// Uses `STATE_DIRECTORY` (set by systemd when `StateDirectory=` is configured),
/// falling back to the user cache directory.
fn default_cache_dir() -> PathBuf {
    std::env::var_os("STATE_DIRECTORY").map_or_else(
        || {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("asset-cache")
        },
        |dir| PathBuf::from(dir).join("caches"),
    )
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Worker configuration.
    pub worker: WorkerConfig,
    /// HTTP client configuration.
    pub network: NetworkConfig,
    /// Front end configuration.
    pub serve: ServeConfig,
    /// Storage paths.
    pub paths: PathConfig,
}

impl AppConfig {
    /// Default location of the configuration file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("asset-cache")
            .join("config.toml")
    }

    /// Loads configuration from a TOML file. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml(&contents)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(Error::Config(format!("{}: {e}", path.display()))),
        }
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on malformed TOML.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))
    }
}
