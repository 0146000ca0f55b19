use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Plugin manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding one sub-directory per installed plugin
    #[serde(default = "default_plugin_root")]
    pub plugin_root: PathBuf,

    /// Namespace for install workspaces
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Hold `<plugin_root>/.lock` while installing or uninstalling
    #[serde(default = "default_true")]
    pub lock_root: bool,
}

// Default value functions
fn default_plugin_root() -> PathBuf {
    vdm_home().join("plugins")
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("vdm")
}

fn default_true() -> bool {
    true
}

/// `~/.vdm`, or a temp directory when there is no home
fn vdm_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".vdm")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plugin_root: default_plugin_root(),
            temp_dir: default_temp_dir(),
            lock_root: true,
        }
    }
}

impl Config {
    /// Configuration rooted at `plugin_root`, everything else default
    #[must_use]
    pub fn with_root<P: Into<PathBuf>>(plugin_root: P) -> Self {
        Self {
            plugin_root: plugin_root.into(),
            ..Self::default()
        }
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;

        let config: Config =
            serde_yaml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Get default configuration path
    pub fn default_config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;

        Ok(home.join(".vdm").join("config.yaml"))
    }
}
