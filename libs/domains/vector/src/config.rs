//! Typed engine configuration.
//!
//! Every struct has documented defaults, `with_*` setters, a `validate()` that
//! enforces bounds, and a `FromEnv` implementation reading `VECTOR_*` variables.

use std::time::Duration;

use core_config::{
    env_bool_or, env_duration_millis_or, env_duration_secs_or, env_parse, env_parse_or,
    ConfigError, FromEnv,
};
use serde::{Deserialize, Serialize};

/// Hard cap on chunk size regardless of configuration.
pub const MAX_CHUNK_SIZE: usize = 10_000;

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub pool: PoolConfig,
    pub batch: BatchConfig,
    pub search: SearchConfig,
    pub cache: CacheConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate()?;
        self.batch.validate()?;
        self.search.validate()?;
        self.cache.validate()
    }
}

impl FromEnv for EngineConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            pool: PoolConfig::from_env()?,
            batch: BatchConfig::from_env()?,
            search: SearchConfig::from_env()?,
            cache: CacheConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Per-target connection pool settings
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections the reaper keeps warm per target (default 2)
    pub min_connections: usize,
    /// Upper bound on connections per target (default 10)
    pub max_connections: usize,
    /// Idle connections unused for longer are closed by the reaper (default 300s)
    pub idle_timeout: Duration,
    /// Timeout for opening a single backend session (default 10s)
    pub connection_timeout: Duration,
    /// Hard bound on waiting for a free slot in `acquire` (default 30s)
    pub acquire_timeout: Duration,
    /// How often a waiting `acquire` re-checks the pool (default 100ms)
    pub acquire_poll_interval: Duration,
    /// Idle reaper period (default 60s)
    pub reaper_interval: Duration,
    /// Health prober period (default 300s)
    pub health_check_interval: Duration,
    /// Timeout for a single liveness probe (default 5s)
    pub probe_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 10,
            idle_timeout: Duration::from_secs(300),
            connection_timeout: Duration::from_secs(10),
            acquire_timeout: Duration::from_secs(30),
            acquire_poll_interval: Duration::from_millis(100),
            reaper_interval: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    pub fn with_limits(mut self, min_connections: usize, max_connections: usize) -> Self {
        self.min_connections = min_connections;
        self.max_connections = max_connections;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.acquire_timeout = timeout;
        self.acquire_poll_interval = poll_interval;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_maintenance_intervals(mut self, reaper: Duration, health: Duration) -> Self {
        self.reaper_interval = reaper;
        self.health_check_interval = health;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::invalid("pool.max_connections", "must be at least 1"));
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigError::invalid(
                "pool.min_connections",
                format!(
                    "{} exceeds max_connections {}",
                    self.min_connections, self.max_connections
                ),
            ));
        }
        for (key, value) in [
            ("pool.idle_timeout", self.idle_timeout),
            ("pool.connection_timeout", self.connection_timeout),
            ("pool.acquire_timeout", self.acquire_timeout),
            ("pool.acquire_poll_interval", self.acquire_poll_interval),
            ("pool.reaper_interval", self.reaper_interval),
            ("pool.health_check_interval", self.health_check_interval),
            ("pool.probe_timeout", self.probe_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::invalid(key, "must be greater than zero"));
            }
        }
        Ok(())
    }
}

impl FromEnv for PoolConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            min_connections: env_parse_or("VECTOR_POOL_MIN_CONNECTIONS", d.min_connections)?,
            max_connections: env_parse_or("VECTOR_POOL_MAX_CONNECTIONS", d.max_connections)?,
            idle_timeout: env_duration_secs_or("VECTOR_POOL_IDLE_TIMEOUT_SECS", d.idle_timeout)?,
            connection_timeout: env_duration_secs_or(
                "VECTOR_POOL_CONNECTION_TIMEOUT_SECS",
                d.connection_timeout,
            )?,
            acquire_timeout: env_duration_secs_or(
                "VECTOR_POOL_ACQUIRE_TIMEOUT_SECS",
                d.acquire_timeout,
            )?,
            acquire_poll_interval: env_duration_millis_or(
                "VECTOR_POOL_ACQUIRE_POLL_MS",
                d.acquire_poll_interval,
            )?,
            reaper_interval: env_duration_secs_or(
                "VECTOR_POOL_REAPER_INTERVAL_SECS",
                d.reaper_interval,
            )?,
            health_check_interval: env_duration_secs_or(
                "VECTOR_POOL_HEALTH_INTERVAL_SECS",
                d.health_check_interval,
            )?,
            probe_timeout: env_duration_secs_or("VECTOR_POOL_PROBE_TIMEOUT_SECS", d.probe_timeout)?,
        })
    }
}

/// Bulk write settings
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Items per backend call (default 1000, capped at [`MAX_CHUNK_SIZE`])
    pub chunk_size: usize,
    /// Allow chunks to run concurrently (default true)
    pub parallel_enabled: bool,
    /// Concurrent chunk limit (default 4)
    pub parallel_batches: usize,
    /// Retries per chunk after the first attempt (default 3)
    pub max_retries: u32,
    /// Linear backoff base: attempt `n` waits `retry_delay × n` (default 1s)
    pub retry_delay: Duration,
    /// Timeout for one chunk attempt including acquire (default 60s)
    pub chunk_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            parallel_enabled: true,
            parallel_batches: 4,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            chunk_timeout: Duration::from_secs(60),
        }
    }
}

impl BatchConfig {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_parallelism(mut self, enabled: bool, parallel_batches: usize) -> Self {
        self.parallel_enabled = enabled;
        self.parallel_batches = parallel_batches.max(1);
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    /// Clamp a requested chunk size into `1..=MAX_CHUNK_SIZE`.
    pub fn effective_chunk_size(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.chunk_size).clamp(1, MAX_CHUNK_SIZE)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::invalid(
                "batch.chunk_size",
                format!("must be within 1..={}", MAX_CHUNK_SIZE),
            ));
        }
        if self.parallel_batches == 0 {
            return Err(ConfigError::invalid("batch.parallel_batches", "must be at least 1"));
        }
        if self.chunk_timeout.is_zero() {
            return Err(ConfigError::invalid("batch.chunk_timeout", "must be greater than zero"));
        }
        Ok(())
    }
}

impl FromEnv for BatchConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            chunk_size: env_parse_or("VECTOR_BATCH_CHUNK_SIZE", d.chunk_size)?,
            parallel_enabled: env_bool_or("VECTOR_BATCH_PARALLEL", d.parallel_enabled)?,
            parallel_batches: env_parse_or("VECTOR_BATCH_PARALLELISM", d.parallel_batches)?,
            max_retries: env_parse_or("VECTOR_BATCH_MAX_RETRIES", d.max_retries)?,
            retry_delay: env_duration_millis_or("VECTOR_BATCH_RETRY_DELAY_MS", d.retry_delay)?,
            chunk_timeout: env_duration_secs_or(
                "VECTOR_BATCH_CHUNK_TIMEOUT_SECS",
                d.chunk_timeout,
            )?,
        })
    }
}

/// Similarity search settings
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Used when a request asks for 0 results (default 10)
    pub default_limit: u32,
    /// Requests are clamped to this many results (default 10000)
    pub max_limit: u32,
    /// Limits above this are split into concurrent sub-queries (default 100)
    pub parallel_search_threshold: u32,
    /// Fan-out gate for sub-queries and per-vector searches (default 8)
    pub max_concurrent_queries: usize,
    /// Lower bound for `hnsw_ef` (default 64)
    pub min_ef: u64,
    /// Upper bound for `hnsw_ef` (default 512)
    pub max_ef: u64,
    /// `hnsw_ef = limit × ef_factor`, clamped (default 2)
    pub ef_factor: u64,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Timeout for one backend query attempt (default 30s)
    pub query_timeout: Duration,
    /// Default hybrid weight of the vector score (default 0.7)
    pub vector_weight: f32,
    /// Default hybrid weight of the keyword score (default 0.3)
    pub text_weight: f32,
    /// Keyword candidates scrolled per requested result (default 3)
    pub keyword_candidates_factor: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 10_000,
            parallel_search_threshold: 100,
            max_concurrent_queries: 8,
            min_ef: 64,
            max_ef: 512,
            ef_factor: 2,
            max_retries: 2,
            retry_delay: Duration::from_millis(200),
            query_timeout: Duration::from_secs(30),
            vector_weight: 0.7,
            text_weight: 0.3,
            keyword_candidates_factor: 3,
        }
    }
}

impl SearchConfig {
    pub fn with_parallel_threshold(mut self, threshold: u32) -> Self {
        self.parallel_search_threshold = threshold.max(1);
        self
    }

    pub fn with_max_limit(mut self, max_limit: u32) -> Self {
        self.max_limit = max_limit;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrent_queries: usize) -> Self {
        self.max_concurrent_queries = max_concurrent_queries.max(1);
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_hybrid_weights(mut self, vector_weight: f32, text_weight: f32) -> Self {
        self.vector_weight = vector_weight;
        self.text_weight = text_weight;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_limit == 0 {
            return Err(ConfigError::invalid("search.max_limit", "must be at least 1"));
        }
        if self.parallel_search_threshold == 0 {
            return Err(ConfigError::invalid(
                "search.parallel_search_threshold",
                "must be at least 1",
            ));
        }
        if self.max_concurrent_queries == 0 {
            return Err(ConfigError::invalid(
                "search.max_concurrent_queries",
                "must be at least 1",
            ));
        }
        if self.min_ef > self.max_ef {
            return Err(ConfigError::invalid("search.min_ef", "must not exceed max_ef"));
        }
        if self.vector_weight < 0.0 || self.text_weight < 0.0 {
            return Err(ConfigError::invalid("search.weights", "must be non-negative"));
        }
        if self.query_timeout.is_zero() {
            return Err(ConfigError::invalid("search.query_timeout", "must be greater than zero"));
        }
        Ok(())
    }
}

impl FromEnv for SearchConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            default_limit: env_parse_or("VECTOR_SEARCH_DEFAULT_LIMIT", d.default_limit)?,
            max_limit: env_parse_or("VECTOR_SEARCH_MAX_LIMIT", d.max_limit)?,
            parallel_search_threshold: env_parse_or(
                "VECTOR_SEARCH_PARALLEL_THRESHOLD",
                d.parallel_search_threshold,
            )?,
            max_concurrent_queries: env_parse_or(
                "VECTOR_SEARCH_MAX_CONCURRENCY",
                d.max_concurrent_queries,
            )?,
            min_ef: env_parse_or("VECTOR_SEARCH_MIN_EF", d.min_ef)?,
            max_ef: env_parse_or("VECTOR_SEARCH_MAX_EF", d.max_ef)?,
            ef_factor: d.ef_factor,
            max_retries: env_parse_or("VECTOR_SEARCH_MAX_RETRIES", d.max_retries)?,
            retry_delay: env_duration_millis_or("VECTOR_SEARCH_RETRY_DELAY_MS", d.retry_delay)?,
            query_timeout: env_duration_secs_or(
                "VECTOR_SEARCH_QUERY_TIMEOUT_SECS",
                d.query_timeout,
            )?,
            vector_weight: env_parse_or("VECTOR_SEARCH_VECTOR_WEIGHT", d.vector_weight)?,
            text_weight: env_parse_or("VECTOR_SEARCH_TEXT_WEIGHT", d.text_weight)?,
            keyword_candidates_factor: d.keyword_candidates_factor,
        })
    }
}

/// Whether a cache hit extends the entry's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CacheStrategy {
    #[default]
    Fixed,
    Sliding,
}

impl std::str::FromStr for CacheStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(CacheStrategy::Fixed),
            "sliding" => Ok(CacheStrategy::Sliding),
            other => Err(format!("unknown cache strategy '{}'", other)),
        }
    }
}

/// Result/metadata cache settings
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    /// TTL for search results (default 300s)
    pub default_ttl: Duration,
    /// TTL for collection info (default 600s)
    pub metadata_ttl: Duration,
    pub strategy: CacheStrategy,
    /// Entry count the pressure check is measured against (default 10000)
    pub max_entries: usize,
    /// Fraction of `max_entries` that triggers eviction (default 0.9)
    pub pressure_threshold: f64,
    /// Run the pressure check every N sets (default 64)
    pub pressure_check_interval: u64,
    /// Decimal places kept when fingerprinting query vectors (default 4)
    pub quantization_decimals: u32,
    pub key_prefix: String,
    /// Redis URL; the in-process store is used when unset
    pub redis_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: Duration::from_secs(300),
            metadata_ttl: Duration::from_secs(600),
            strategy: CacheStrategy::Fixed,
            max_entries: 10_000,
            pressure_threshold: 0.9,
            pressure_check_interval: 64,
            quantization_decimals: 4,
            key_prefix: "vector_cache".to_string(),
            redis_url: None,
        }
    }
}

impl CacheConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_capacity(mut self, max_entries: usize, check_interval: u64) -> Self {
        self.max_entries = max_entries;
        self.pressure_check_interval = check_interval.max(1);
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Entry count at which `evict_pressure` kicks in.
    pub fn pressure_watermark(&self) -> usize {
        ((self.max_entries as f64) * self.pressure_threshold).ceil() as usize
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::invalid("cache.max_entries", "must be at least 1"));
        }
        if !(self.pressure_threshold > 0.0 && self.pressure_threshold <= 1.0) {
            return Err(ConfigError::invalid(
                "cache.pressure_threshold",
                "must be within (0, 1]",
            ));
        }
        if self.quantization_decimals > 9 {
            return Err(ConfigError::invalid(
                "cache.quantization_decimals",
                "must be at most 9",
            ));
        }
        let prefix_ok = !self.key_prefix.is_empty()
            && self
                .key_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !prefix_ok {
            return Err(ConfigError::invalid(
                "cache.key_prefix",
                "must be non-empty and contain only [A-Za-z0-9_-]",
            ));
        }
        Ok(())
    }
}

impl FromEnv for CacheConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            enabled: env_bool_or("VECTOR_CACHE_ENABLED", d.enabled)?,
            default_ttl: env_duration_secs_or("VECTOR_CACHE_TTL_SECS", d.default_ttl)?,
            metadata_ttl: env_duration_secs_or("VECTOR_CACHE_METADATA_TTL_SECS", d.metadata_ttl)?,
            strategy: env_parse_or("VECTOR_CACHE_STRATEGY", d.strategy)?,
            max_entries: env_parse_or("VECTOR_CACHE_MAX_ENTRIES", d.max_entries)?,
            pressure_threshold: d.pressure_threshold,
            pressure_check_interval: d.pressure_check_interval,
            quantization_decimals: env_parse_or(
                "VECTOR_CACHE_QUANTIZATION",
                d.quantization_decimals,
            )?,
            key_prefix: env_parse::<String>("VECTOR_CACHE_PREFIX")?.unwrap_or(d.key_prefix),
            redis_url: std::env::var("REDIS_URL").ok(),
        })
    }
}
