//! Configuration: where trace keeps its database and lock, and how long to wait.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the trace home directory.
pub const HOME_ENV: &str = "TRACE_HOME";

const CONFIG_FILE: &str = "config.yaml";

/// Settings read from `{home}/config.yaml`; every field is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the database, lock and config file
    #[serde(skip)]
    pub home: PathBuf,

    /// Bound on waiting for the sync lock
    pub lock_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            home: PathBuf::from(".trace"),
            lock_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Resolve the home directory and load its config file.
    ///
    /// Home is `$TRACE_HOME` if set, otherwise `~/.trace`.
    pub fn load() -> Result<Self> {
        let home = match std::env::var_os(HOME_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::home_dir()
                .ok_or_else(|| eyre::eyre!("Cannot determine home directory; set {}", HOME_ENV))?
                .join(".trace"),
        };
        Self::load_from(&home)
    }

    /// Load settings for an explicit home directory.
    pub fn load_from(home: &Path) -> Result<Self> {
        let path = home.join(CONFIG_FILE);
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            if text.trim().is_empty() {
                Self::default()
            } else {
                serde_yaml::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))?
            }
        } else {
            Self::default()
        };

        config.home = home.to_path_buf();
        log::debug!("config: {:?}", config);
        Ok(config)
    }

    pub fn db_path(&self) -> PathBuf {
        self.home.join("trace.db")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.home.join(".lock")
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
