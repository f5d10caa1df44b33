use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use anyhow::{bail, Context, Result};
use shared::types::ServiceKind;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    pub services: Vec<ServiceSourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Upper bound on how long a watch request waits for a change
    #[serde(default = "default_watch_timeout")]
    pub watch_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Where to fetch status for one service kind
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSourceConfig {
    pub kind: ServiceKind,
    pub status_url: String,
}

fn default_listen() -> String {
    "[::]:8054".to_string()
}

fn default_watch_timeout() -> u64 {
    30
}

fn default_interval() -> u64 {
    5
}

fn default_timeout() -> u64 {
    3
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            watch_timeout_secs: default_watch_timeout(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            timeout_secs: default_timeout(),
        }
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.services.is_empty() {
            bail!("at least one [[services]] entry is required");
        }
        if self.refresh.interval_secs == 0 {
            bail!("refresh.interval_secs must be greater than zero");
        }
        if self.refresh.timeout_secs == 0 {
            bail!("refresh.timeout_secs must be greater than zero");
        }

        let mut seen = HashSet::new();
        for service in &self.services {
            if !seen.insert(service.kind) {
                bail!("service kind {} is configured more than once", service.kind);
            }
        }
        Ok(())
    }
}
