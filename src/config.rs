//! Bridge configuration
//!
//! Read from `~/.config/selfmon/config.toml`. A missing file means defaults;
//! a present but broken one is an error. `SELFMON_BROKER_URL` and
//! `SELFMON_MODULE_PATH` override the file.

use crate::discovery::DiscoveryTimeouts;
use crate::mqtt::BrokerConfig;
use crate::topics::{InvalidModulePath, ModuleIdentity};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const CONFIG_DIR: &str = ".config/selfmon";
pub const CONFIG_FILE: &str = "config.toml";
pub const ENV_BROKER_URL: &str = "SELFMON_BROKER_URL";
pub const ENV_MODULE_PATH: &str = "SELFMON_MODULE_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading or writing the file failed
    #[error("Config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this layout
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Configured module path does not look like `selfmon/vmod.<hex>`
    #[error(transparent)]
    ModulePath(#[from] InvalidModulePath),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub module_window_secs: u64,
    pub sensor_window_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        let defaults = DiscoveryTimeouts::default();
        Self {
            module_window_secs: defaults.module_window.as_secs(),
            sensor_window_secs: defaults.sensor_window.as_secs(),
        }
    }
}

impl DiscoveryConfig {
    pub fn timeouts(&self) -> DiscoveryTimeouts {
        DiscoveryTimeouts {
            module_window: Duration::from_secs(self.module_window_secs),
            sensor_window: Duration::from_secs(self.sensor_window_secs),
        }
    }
}

/// Module preset for unattended setup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub enable_outputs: bool,
}

impl ModuleConfig {
    /// Validated module path, if one is configured
    pub fn identity(&self) -> Result<Option<ModuleIdentity>, ConfigError> {
        self.path
            .as_deref()
            .map(ModuleIdentity::parse)
            .transpose()
            .map_err(ConfigError::from)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub broker: BrokerConfig,
    pub discovery: DiscoveryConfig,
    pub module: ModuleConfig,
}

impl BridgeConfig {
    /// `~/.config/selfmon/config.toml`
    pub fn default_path() -> PathBuf {
        let mut path = config_dir();
        path.push(CONFIG_FILE);
        path
    }

    /// Loads `path`, falling back to defaults when the file does not exist
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if !exists {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Writes the config as pretty TOML, creating the directory if needed
    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await.map_err(io_err)?;
        info!("Config saved to {}", path.display());
        Ok(())
    }

    /// Applies `SELFMON_*` overrides from the process environment
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BROKER_URL).filter(|v| !v.trim().is_empty()) {
            debug!("Broker URL overridden by {}", ENV_BROKER_URL);
            self.broker.url = url.trim().to_string();
        }
        if let Some(path) = lookup(ENV_MODULE_PATH).filter(|v| !v.trim().is_empty()) {
            debug!("Module path overridden by {}", ENV_MODULE_PATH);
            self.module.path = Some(path.trim().to_string());
        }
        self
    }
}

/// `~/.config/selfmon`, or `./.config/selfmon` without a home directory
pub fn config_dir() -> PathBuf {
    let mut path = dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    });
    path.push(CONFIG_DIR);
    path
}
