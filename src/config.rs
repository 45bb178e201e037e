use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{olog_debug, Error, Result};

/// Script looked up when no operation-specific script is configured.
pub const DEFAULT_SCRIPT_KEY: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Concurrency ceiling of the task worker pool.
    pub max_workers: usize,
    /// Timeout applied to batch commands (artifact staging).
    pub default_timeout_secs: u64,
    /// Optional timeout for streamed task scripts; unlimited when unset.
    pub script_timeout_secs: Option<u64>,
    /// Idle interval after which the stream consumer emits a heartbeat frame.
    pub heartbeat_secs: u64,
    /// Delay between ordered phases so process state can settle.
    pub phase_settle_secs: u64,
    /// Delay between base reload tasks and the trigger URLs.
    pub reload_settle_secs: u64,
    /// Delay between trigger URLs and status URLs.
    pub reload_status_delay_secs: u64,
    pub http_timeout_secs: u64,
    pub log_dir: Option<String>,
    pub log_retention: usize,
    /// Inventory file backing the data-access collaborator.
    pub inventory: Option<String>,
    /// Operation code → script path; `default` is the fallback.
    pub scripts: HashMap<String, String>,
    pub artifacts: ArtifactConfig,
    pub remote: RemoteConfig,
    /// Client-update target → command run on the remote host.
    pub client_updates: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub svn_bin: String,
    pub checkout_dir: Option<String>,
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Channels sharing another channel's artifact directory.
    pub channel_aliases: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub host: Option<String>,
    pub port: u16,
    pub user: String,
    pub key_path: Option<String>,
    pub password: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: 10,
            default_timeout_secs: 300,
            script_timeout_secs: None,
            heartbeat_secs: 30,
            phase_settle_secs: 5,
            reload_settle_secs: 1,
            reload_status_delay_secs: 5,
            http_timeout_secs: 10,
            log_dir: None,
            log_retention: 30,
            inventory: None,
            scripts: HashMap::new(),
            artifacts: ArtifactConfig::default(),
            remote: RemoteConfig::default(),
            client_updates: HashMap::new(),
        }
    }
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            svn_bin: "svn".to_string(),
            checkout_dir: None,
            url: None,
            username: None,
            password: None,
            channel_aliases: HashMap::new(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 22,
            user: "root".to_string(),
            key_path: None,
            password: None,
        }
    }
}

impl Config {
    pub fn home_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".zoneops"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::home_dir()?.join("zoneops.toml"))
    }

    pub fn log_dir(&self) -> Result<PathBuf> {
        match &self.log_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::home_dir()?.join("logs")),
        }
    }

    pub fn inventory_path(&self) -> Result<PathBuf> {
        match &self.inventory {
            Some(path) => Ok(expand_tilde(path)),
            None => Ok(Self::home_dir()?.join("inventory.json")),
        }
    }

    pub fn checkout_dir(&self) -> Result<PathBuf> {
        match &self.artifacts.checkout_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::home_dir()?.join("artifacts")),
        }
    }

    /// Script for an operation code, falling back to the default script.
    pub fn script_for(&self, key: &str) -> Option<PathBuf> {
        self.scripts
            .get(key)
            .or_else(|| self.scripts.get(DEFAULT_SCRIPT_KEY))
            .map(|s| expand_tilde(s))
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn script_timeout(&self) -> Option<Duration> {
        self.script_timeout_secs.map(Duration::from_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Load from the default location; a missing file yields defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        olog_debug!("Config::load path={}", path.display());
        let mut config = if path.exists() {
            toml::from_str(&fs::read_to_string(path)?)?
        } else {
            olog_debug!("Config file not found, using defaults");
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        olog_debug!(
            "Config loaded: max_workers={}, scripts={}, inventory={:?}",
            config.max_workers,
            config.scripts.len(),
            config.inventory
        );
        Ok(config)
    }

    /// Override secrets and hosts from the environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(user) = lookup("ZONEOPS_SVN_USER") {
            self.artifacts.username = Some(user);
        }
        if let Some(pass) = lookup("ZONEOPS_SVN_PASS") {
            self.artifacts.password = Some(pass);
        }
        if let Some(url) = lookup("ZONEOPS_SVN_URL") {
            self.artifacts.url = Some(url);
        }
        if let Some(host) = lookup("ZONEOPS_CLIENT_HOST") {
            self.remote.host = Some(host);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::Validation(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.http_timeout_secs == 0 {
            return Err(Error::Validation(
                "http_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
