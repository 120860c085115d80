//! Configuration management for Tally.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TallyError};

/// Prefix for environment variable overrides, e.g. `TALLY__LIMITER__MAX_CALLS`.
const ENV_PREFIX: &str = "TALLY";

/// Main configuration for the Tally service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TallyConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Storage backend selection
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8090))
}

/// Quota configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Maximum calls per key in each window
    #[serde(default = "default_max_calls")]
    pub max_calls: u64,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl LimiterConfig {
    /// Window length as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_calls: default_max_calls(),
            window_secs: default_window_secs(),
        }
    }
}

fn default_max_calls() -> u64 {
    100
}

fn default_window_secs() -> u64 {
    3600
}

/// Which storage the limiter counts in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Process-local counters
    #[default]
    Memory,
    /// Counters shared through Redis
    Redis(SharedStorageConfig),
}

/// Redis connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedStorageConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Number of pooled connections
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for SharedStorageConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_pool_size() -> usize {
    4
}

impl TallyConfig {
    /// Load configuration from an optional YAML file, then apply `TALLY__*`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Yaml),
            );
        }

        let config: TallyConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| TallyError::Config(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TallyConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TallyError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the limiter cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.limiter.max_calls == 0 {
            return Err(TallyError::Config("max_calls must be positive".to_string()));
        }
        if self.limiter.window_secs == 0 {
            return Err(TallyError::Config("window_secs must be positive".to_string()));
        }
        if let StorageConfig::Redis(redis) = &self.storage {
            if redis.url.is_empty() {
                return Err(TallyError::Config("redis url is required".to_string()));
            }
            if redis.pool_size == 0 {
                return Err(TallyError::Config("redis pool_size must be positive".to_string()));
            }
        }
        Ok(())
    }
}
