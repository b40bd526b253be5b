//! CLI configuration handling.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use keyward_core::StorageMethod;
use keyward_core::store::PREFERENCES_FILE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywardConfig {
    /// Keyring service name under which the unified record is stored.
    pub keyring_service: String,

    /// Directory holding the plain preference file.
    pub data_dir: PathBuf,

    /// Backend used for providers with no recorded preference.
    pub default_method: StorageMethod,

    /// Logging level.
    pub log_level: String,

    /// Path to the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: PathBuf,
}

impl Default for KeywardConfig {
    fn default() -> Self {
        let data_dir = project_dirs()
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".keyward"));

        Self {
            keyring_service: "keyward".to_string(),
            data_dir,
            default_method: StorageMethod::Secure,
            log_level: "info".to_string(),
            config_path: PathBuf::new(),
        }
    }
}

impl KeywardConfig {
    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join(PREFERENCES_FILE)
    }
}

/// Load configuration from `path`, or from the default location when `None`.
///
/// A missing file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<KeywardConfig> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path(),
    };

    let config = read_config(&config_path)?;

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data directory {:?}", config.data_dir))?;

    Ok(config)
}

fn read_config(config_path: &Path) -> Result<KeywardConfig> {
    let mut config = if config_path.exists() {
        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", config_path))?
    } else {
        KeywardConfig::default()
    };

    config.config_path = config_path.to_path_buf();
    Ok(config)
}

fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join("keyward.toml"))
        .unwrap_or_else(|| PathBuf::from("keyward.toml"))
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "keyward", "keyward")
}
