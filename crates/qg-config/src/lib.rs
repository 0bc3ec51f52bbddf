//! Fault-tolerance configuration
//!
//! TOML surface for the decoration layer: global retry defaults, the breaker
//! sharing scope, and the set of named clients with optional per-client
//! overrides. Resolution turns the raw file shape into validated
//! `ClientConfig` values; nothing downstream ever re-parses.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use qg_common::ClientConfig;

pub use qg_common::BreakerScope;

const DEFAULT_RETRY_TIMEOUT_MS: u64 = 5000;
const DEFAULT_RETRY_DELAY_MS: u64 = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// One named client in the config file; unset fields inherit the globals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEntry {
    pub name: String,
    #[serde(default)]
    pub retry_timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry_attempts: Option<u32>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
}

/// Top-level fault-tolerance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultToleranceConfig {
    /// Master switch; when false, no clients are decorated
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub breaker_scope: BreakerScope,

    /// Default retry window applied to clients without an override
    #[serde(default = "default_retry_timeout_ms")]
    pub retry_timeout_ms: u64,

    /// Default attempt cap; absent means timeout-bounded only
    #[serde(default)]
    pub retry_attempts: Option<u32>,

    /// Default pause between attempts
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default)]
    pub clients: Vec<ClientEntry>,
}

fn default_enabled() -> bool {
    true
}

fn default_retry_timeout_ms() -> u64 {
    DEFAULT_RETRY_TIMEOUT_MS
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

impl Default for FaultToleranceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            breaker_scope: BreakerScope::default(),
            retry_timeout_ms: DEFAULT_RETRY_TIMEOUT_MS,
            retry_attempts: None,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            clients: Vec::new(),
        }
    }
}

impl FaultToleranceConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&raw)?;
        info!(
            path = %path.display(),
            clients = config.clients.len(),
            enabled = config.enabled,
            "Loaded fault-tolerance config"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for client in &self.clients {
            if client.name.trim().is_empty() {
                return Err(ConfigError::Invalid("client name must not be empty".to_string()));
            }
            if !seen.insert(client.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate client name: {}",
                    client.name
                )));
            }
            if client.retry_timeout_ms.unwrap_or(self.retry_timeout_ms) == 0 {
                return Err(ConfigError::Invalid(format!(
                    "client {} has zero retry timeout",
                    client.name
                )));
            }
        }
        Ok(())
    }

    /// Resolve the file shape into validated per-client settings.
    ///
    /// Returns an empty set when the master switch is off.
    pub fn resolved_clients(&self) -> Vec<ClientConfig> {
        if !self.enabled {
            return Vec::new();
        }

        self.clients
            .iter()
            .map(|entry| {
                let timeout =
                    Duration::from_millis(entry.retry_timeout_ms.unwrap_or(self.retry_timeout_ms));
                let delay =
                    Duration::from_millis(entry.retry_delay_ms.unwrap_or(self.retry_delay_ms));
                let mut config = ClientConfig::new(&entry.name, timeout).with_retry_delay(delay);
                if let Some(attempts) = entry.retry_attempts.or(self.retry_attempts) {
                    config = config.with_retry_attempts(attempts);
                }
                config
            })
            .collect()
    }
}
