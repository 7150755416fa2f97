use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::Client;
use redis::aio::ConnectionManager;
use tracing::info;

use super::store::CacheStore;
use crate::error::VectorResult;
use crate::retry::{RetryPolicy, retry_with_policy};

/// [`CacheStore`] over a Redis `ConnectionManager`, which reconnects on its own.
#[derive(Clone)]
pub struct RedisCacheStore {
    manager: ConnectionManager,
}

impl RedisCacheStore {
    /// Connect and verify the connection with `PING`.
    pub async fn connect(url: &str) -> VectorResult<Self> {
        info!(url = %url, "Connecting cache store to Redis");

        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;

        let mut conn = manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!("Redis cache store ready");
        Ok(Self { manager })
    }

    /// [`connect`](Self::connect) with exponential backoff for startup races.
    pub async fn connect_with_retry(url: &str, max_retries: u32) -> VectorResult<Self> {
        let policy = RetryPolicy::exponential(
            max_retries,
            Duration::from_millis(100),
            Duration::from_secs(5),
        );
        retry_with_policy(&policy, "redis_connect", |_| Self::connect(url)).await
    }

    pub fn from_manager(manager: ConnectionManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> VectorResult<Option<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.get::<_, Option<String>>(key).await?)
    }

    async fn set_ex(&self, key: &str, value: String, ttl_secs: u64) -> VectorResult<()> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs.max(1)).await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> VectorResult<Vec<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.keys::<_, Vec<String>>(pattern).await?)
    }

    async fn delete(&self, keys: &[String]) -> VectorResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.manager.clone();
        Ok(conn.del::<_, usize>(keys.to_vec()).await?)
    }
}
