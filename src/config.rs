use anyhow::{Context, Result};
use declarative::ReconcileOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the config directory path
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("hmcctl"))
}

/// Expand `~` in a configured path
fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Settings from `~/.config/hmcctl/config.toml`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Console inventory snapshot, defaults to `inventory.json` in the config dir
    pub inventory: Option<String>,
    pub default_cpc: Option<String>,
    pub status_timeout_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub assume_yes: bool,
}

impl Config {
    /// Location of the config file
    pub fn path() -> Result<PathBuf> {
        Ok(config_dir()?.join("config.toml"))
    }

    /// Load the config file, falling back to defaults when it does not exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("no config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Inventory snapshot path
    pub fn inventory_path(&self) -> Result<PathBuf> {
        match &self.inventory {
            Some(path) => Ok(expand(path)),
            None => Ok(config_dir()?.join("inventory.json")),
        }
    }

    /// Reconcile options, with an optional timeout from the command line
    pub fn options(&self, timeout_secs: Option<u64>) -> ReconcileOptions {
        let mut options = ReconcileOptions::default();
        if let Some(secs) = timeout_secs.or(self.status_timeout_secs) {
            options.status_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = self.poll_interval_ms {
            options.poll_interval = Duration::from_millis(ms);
        }
        options
    }
}
