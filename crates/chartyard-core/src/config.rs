//! Daemon configuration
//!
//! Stored as YAML in `~/.config/chartyard/config.yaml` unless a path is given
//! explicitly. Every field has a default, so an absent file is equivalent to
//! an empty one.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backoff::{MIN_SYNC_PERIOD, RELEASE_BACKOFF_CAP, SYNC_BACKOFF_CAP, SYNC_FAILURE_STEP};
use crate::error::{CoreError, Result};
use crate::history::DEFAULT_HISTORY_CAP;

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChartyardConfig {
    /// Package-manager invocation settings
    pub helm: HelmConfig,

    /// Repository synchronization settings
    pub sync: SyncConfig,

    /// Release reconciliation settings
    pub release: ReleaseConfig,

    /// Object storage backing the curated app store
    pub object_store: Option<ObjectStoreConfig>,
}

impl ChartyardConfig {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CoreError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default configuration path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| CoreError::InvalidConfig {
            message: "Could not determine config directory".to_string(),
        })?;
        Ok(config_dir.join("chartyard").join("config.yaml"))
    }

    fn validate(&self) -> Result<()> {
        if self.helm.binary.trim().is_empty() && !self.helm.mock {
            return Err(CoreError::InvalidConfig {
                message: "helm.binary must not be empty unless helm.mock is set".to_string(),
            });
        }
        if self.sync.history_cap == 0 || self.release.history_cap == 0 {
            return Err(CoreError::InvalidConfig {
                message: "history caps must be at least 1".to_string(),
            });
        }
        if let Some(store) = &self.object_store {
            if store.bucket.is_empty() {
                return Err(CoreError::InvalidConfig {
                    message: "objectStore.bucket must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// How the external package manager is invoked
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HelmConfig {
    /// Path or name of the package-manager binary
    pub binary: String,

    /// Re-exec the current binary as a deterministic stand-in
    pub mock: bool,

    /// Parent directory for per-invocation workspaces (system temp dir if unset)
    pub workspace_dir: Option<PathBuf>,

    /// Kill the subprocess after this long
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// Pass `--debug` to the binary
    pub debug: bool,
}

impl Default for HelmConfig {
    fn default() -> Self {
        Self {
            binary: "helm".to_string(),
            mock: false,
            workspace_dir: None,
            timeout: Some(Duration::from_secs(600)),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Floor applied to non-zero sync periods
    #[serde(with = "humantime_serde")]
    pub min_period: Duration,

    /// Retry delay added per consecutive failure
    #[serde(with = "humantime_serde")]
    pub failure_step: Duration,

    /// Upper bound for failure retry delays
    #[serde(with = "humantime_serde")]
    pub failure_cap: Duration,

    pub history_cap: usize,

    /// Maximum length of a failure message stored in history
    pub message_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_period: MIN_SYNC_PERIOD,
            failure_step: SYNC_FAILURE_STEP,
            failure_cap: SYNC_BACKOFF_CAP,
            history_cap: DEFAULT_HISTORY_CAP,
            message_limit: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReleaseConfig {
    /// Upper bound for redeploy delays
    #[serde(with = "humantime_serde")]
    pub backoff_cap: Duration,

    pub history_cap: usize,

    /// Maximum length of subprocess output stored in status
    pub message_limit: usize,

    /// Name of the cluster the platform itself runs in
    pub host_cluster: String,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            backoff_cap: RELEASE_BACKOFF_CAP,
            history_cap: DEFAULT_HISTORY_CAP,
            message_limit: 1024,
            host_cluster: "host".to_string(),
        }
    }
}

/// S3-compatible storage holding curated chart archives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStoreConfig {
    #[serde(default)]
    pub endpoint: Option<String>,

    pub bucket: String,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(default)]
    pub secret_access_key: Option<String>,

    #[serde(default)]
    pub force_path_style: bool,
}
