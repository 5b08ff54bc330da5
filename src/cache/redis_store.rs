use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use tracing::info;

use super::{CacheError, CacheStore};

/// How long a single Redis round-trip may take before the proxy gives up on
/// the cache and goes upstream instead.
const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);
const CONNECTION_TIMEOUT: Duration = Duration::from_millis(500);

/// [`CacheStore`] backed by Redis `GET` / `SETEX`.
///
/// The [`ConnectionManager`] reconnects on its own after an outage, so one
/// `RedisCache` lives for the whole process. `SETEX` replaces the value and
/// its expiry in a single command, which keeps entries all-or-nothing even
/// if the request that triggered the write is dropped midway.
#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache")
            .field("connection", &"<ConnectionManager>")
            .finish()
    }
}

impl RedisCache {
    /// Opens a managed connection to `redis_url`.
    ///
    /// Fails if the URL is malformed or the first connection cannot be made;
    /// callers are expected to fall back to running without a cache.
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(1)
            .set_connection_timeout(CONNECTION_TIMEOUT)
            .set_response_timeout(RESPONSE_TIMEOUT);

        let client = redis::Client::open(redis_url)?;
        let connection = client.get_connection_manager_with_config(config).await?;
        info!("connected to redis");

        Ok(Self { connection })
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let value: Option<String> = self.connection.clone().get(key).await?;
        Ok(value)
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        // SETEX rejects a zero expiry.
        let seconds = ttl.as_secs().max(1);
        let _: () = self.connection.clone().set_ex(key, value, seconds).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_url_is_an_error() {
        let err = RedisCache::connect("not a redis url").await.unwrap_err();
        assert!(matches!(err, CacheError::Redis(_)));
    }

    #[tokio::test]
    async fn unreachable_server_is_an_error() {
        // Port 1 on loopback refuses connections.
        let result = RedisCache::connect("redis://127.0.0.1:1/").await;
        assert!(result.is_err());
    }
}
