//! Store and sync configuration.
//!
//! Everything here is plain data that deserializes from TOML. Which remote
//! backend is active is decided here, at deployment time, and nowhere else.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::remote::{HttpAdapter, MemoryAdapter, RemoteSyncAdapter};

/// Default per-image size used by the storage estimate (100 KiB).
pub const DEFAULT_PER_IMAGE_SIZE_ESTIMATE: u64 = 100 * 1024;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base path for the store.
    pub path: PathBuf,

    /// Blob cache size (number of blobs).
    pub blob_cache_size: usize,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// fsync the record log every N appends.
    pub sync_interval: u64,

    /// Cap on bytes held by blob files. `None` means bounded only by the disk.
    pub capacity_bytes: Option<u64>,

    /// Bytes assumed per image when estimating storage size.
    pub per_image_size_estimate: u64,

    /// Reject a submission whose id is already recorded.
    pub enforce_unique_submission_ids: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./checkins"),
            blob_cache_size: 32,
            create_if_missing: true,
            sync_interval: 1,
            capacity_bytes: None,
            per_image_size_estimate: DEFAULT_PER_IMAGE_SIZE_ESTIMATE,
            enforce_unique_submission_ids: false,
        }
    }
}

impl StoreConfig {
    /// Config rooted at `path`, everything else default.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// Sync orchestration settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Which remote backend receives mirrored check-ins.
    pub backend: BackendConfig,

    /// Ask the backend whether it is reachable before uploading.
    pub probe_reachability: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::None,
            probe_reachability: true,
        }
    }
}

/// Remote backend selection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Local-only; nothing is mirrored.
    #[default]
    None,

    /// In-process backend, for demos and tests.
    Memory,

    /// REST backend.
    Http(HttpBackendConfig),
}

/// Settings for the HTTP backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HttpBackendConfig {
    /// Base URL, e.g. `https://checkins.example.org/api`.
    pub base_url: String,

    /// Sent as a bearer token when present.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout.
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_http_timeout_secs() -> u64 {
    15
}

impl HttpBackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl BackendConfig {
    /// Construct the configured adapter, or `None` for local-only operation.
    pub fn build(&self) -> Result<Option<Arc<dyn RemoteSyncAdapter>>, ConfigError> {
        match self {
            BackendConfig::None => Ok(None),
            BackendConfig::Memory => Ok(Some(Arc::new(MemoryAdapter::new()))),
            BackendConfig::Http(http) => {
                let adapter = HttpAdapter::new(http.clone())
                    .map_err(|e| ConfigError::Invalid(format!("http backend: {e}")))?;
                Ok(Some(Arc::new(adapter)))
            }
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub sync: SyncConfig,
}

impl AppConfig {
    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration, reporting every problem at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.store.path.as_os_str().is_empty() {
            errors.push("store.path must not be empty".to_string());
        }
        if self.store.per_image_size_estimate == 0 {
            errors.push("store.per_image_size_estimate must be positive".to_string());
        }
        if self.store.capacity_bytes == Some(0) {
            errors.push("store.capacity_bytes must be positive when set".to_string());
        }

        if let BackendConfig::Http(http) = &self.sync.backend {
            if !(http.base_url.starts_with("http://") || http.base_url.starts_with("https://")) {
                errors.push(format!(
                    "sync.backend.base_url must be an http(s) URL, got '{}'",
                    http.base_url
                ));
            }
            if !(1..=300).contains(&http.timeout_secs) {
                errors.push(format!(
                    "sync.backend.timeout_secs must be within 1..=300, got {}",
                    http.timeout_secs
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_is_valid() {
        AppConfig::default().validate().unwrap();
        assert_eq!(
            StoreConfig::default().per_image_size_estimate,
            DEFAULT_PER_IMAGE_SIZE_ESTIMATE
        );
    }

    #[test]
    fn test_parse_http_backend() {
        let config: AppConfig = toml::from_str(
            r#"
            [store]
            path = "/var/lib/checkins"
            capacity_bytes = 1048576

            [sync]
            probe_reachability = false

            [sync.backend]
            kind = "http"
            base_url = "https://checkins.example.org/api"
            api_key = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.store.path, PathBuf::from("/var/lib/checkins"));
        assert_eq!(config.store.capacity_bytes, Some(1_048_576));
        assert!(config.store.create_if_missing);
        assert!(!config.sync.probe_reachability);
        match &config.sync.backend {
            BackendConfig::Http(http) => {
                assert_eq!(http.api_key.as_deref(), Some("secret"));
                assert_eq!(http.timeout_secs, 15);
            }
            other => panic!("unexpected backend {other:?}"),
        }
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_collects_errors() {
        let mut config = AppConfig::default();
        config.store.per_image_size_estimate = 0;
        config.sync.backend = BackendConfig::Http(HttpBackendConfig {
            base_url: "ftp://nope".into(),
            api_key: None,
            timeout_secs: 0,
        });

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("per_image_size_estimate"));
        assert!(err.contains("base_url"));
        assert!(err.contains("timeout_secs"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.sync.backend = BackendConfig::Memory;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.sync.backend, BackendConfig::Memory);
    }

    #[test]
    fn test_build_backends() {
        assert!(BackendConfig::None.build().unwrap().is_none());
        let memory = BackendConfig::Memory.build().unwrap().unwrap();
        assert_eq!(memory.name(), "memory");
    }

    #[test]
    fn test_bad_http_url_is_config_error() {
        let backend = BackendConfig::Http(HttpBackendConfig {
            base_url: "::not a url::".into(),
            api_key: None,
            timeout_secs: 5,
        });
        assert!(matches!(backend.build(), Err(ConfigError::Invalid(_))));
    }
}
