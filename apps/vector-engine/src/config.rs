use std::time::Duration;

use core_config::{env_duration_secs_or, env_or_default, env_parse_or, ConfigError, Environment, FromEnv};
use domain_vector::{EngineConfig, QdrantConfig};

/// Host process configuration
/// Composes the engine and Qdrant configs with the host's own settings
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: Environment,
    pub engine: EngineConfig,
    pub qdrant: QdrantConfig,
    /// Port of the Prometheus scrape endpoint (`VECTOR_METRICS_PORT`, default 9100)
    pub metrics_port: u16,
    /// Pool and cache status log period (`VECTOR_STATUS_INTERVAL_SECS`, default 60s)
    pub status_interval: Duration,
    /// Collections whose pools are opened to `min_connections` at startup
    pub warm_collections: Vec<String>,
}

impl FromEnv for Config {
    fn from_env() -> Result<Self, ConfigError> {
        let status_interval = env_duration_secs_or("VECTOR_STATUS_INTERVAL_SECS", Duration::from_secs(60))?;
        if status_interval.is_zero() {
            return Err(ConfigError::invalid("VECTOR_STATUS_INTERVAL_SECS", "must be positive"));
        }

        let warm_collections = env_or_default("VECTOR_WARM_COLLECTIONS", "")
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect();

        Ok(Self {
            environment: Environment::from_env(),
            engine: EngineConfig::from_env()?,
            qdrant: QdrantConfig::from_env()?,
            metrics_port: env_parse_or("VECTOR_METRICS_PORT", 9100)?,
            status_interval,
            warm_collections,
        })
    }
}
