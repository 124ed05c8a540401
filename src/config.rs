// ABOUTME: TOML configuration for the relay: schema list, Canal endpoint, destination, loop tuning
// ABOUTME: Loaded once at startup; validation failures are fatal before anything connects

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::translate::IdentityFallback;

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Comma-separated source schema names.
    pub databases: String,
    #[serde(default)]
    pub error_log_path: Option<String>,
    pub canal: CanalConfig,
    #[serde(default)]
    pub dest_mysql: Option<DestinationConfig>,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CanalConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub client_id: String,
    pub destination: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default)]
    pub unresolved_identity: IdentityFallback,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_timeout_ms: default_poll_timeout_ms(),
            interval_ms: default_interval_ms(),
            unresolved_identity: IdentityFallback::default(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_read_timeout_ms() -> u64 {
    30_000
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_batch_size() -> usize {
    100
}

fn default_poll_timeout_ms() -> u64 {
    1_000
}

fn default_interval_ms() -> u64 {
    500
}

impl RelayConfig {
    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: RelayConfig = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schemas().is_empty() {
            bail!("'databases' must name at least one schema");
        }
        if self.sync.batch_size == 0 {
            bail!("'sync.batch_size' must be greater than zero");
        }
        if self.sync.batch_size > i32::MAX as usize {
            bail!("'sync.batch_size' is too large: {}", self.sync.batch_size);
        }
        Ok(())
    }

    /// Schema names, trimmed, in configured order, empty entries dropped.
    pub fn schemas(&self) -> Vec<String> {
        self.databases
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    /// Canal filter expression selecting every table of the configured schemas.
    pub fn subscription_filter(&self) -> String {
        format!("({})\\..*", self.schemas().join("|"))
    }

    /// `None` when unset or blank, meaning warnings go to stderr only.
    pub fn error_log_path(&self) -> Option<&str> {
        self.error_log_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.sync.poll_timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.sync.interval_ms)
    }
}

impl CanalConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
