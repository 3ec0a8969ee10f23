//! Redis transport.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool, Runtime};
use futures_util::StreamExt;
use redis::AsyncCommands;

use super::{InboundMessage, MessageStream, RemoteStore};
use crate::config::RedisConfig;
use crate::error::{CacheError, Result};

/// Redis-backed [`RemoteStore`].
///
/// The connection pool is built up front so a malformed endpoint fails at
/// startup; connections themselves are opened on demand. Each command is
/// bounded by `timeout_ms` and reports `StoreUnavailable` when it elapses.
pub struct RedisStore {
    config: RedisConfig,
    pool: Pool,
}

impl RedisStore {
    /// Returns a configuration error if the URL is empty or does not parse.
    pub fn new(config: RedisConfig) -> Result<Self> {
        if config.url.trim().is_empty() {
            return Err(CacheError::configuration("Redis connection URL is empty"));
        }
        let pool = create_pool(&config)?;
        Ok(Self { config, pool })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    async fn conn(&self) -> Result<Connection> {
        Ok(self.pool.get().await?)
    }

    /// Run one command against a pooled connection under the configured timeout.
    async fn run<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(Connection) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = self.config.timeout();
        let work = async {
            let conn = self.conn().await?;
            f(conn).await
        };

        match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::store_unavailable(format!(
                "Redis {op} timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Close the pool; later calls fail with `StoreUnavailable`.
    pub fn close(&self) {
        self.pool.close();
        tracing::info!("Redis pool closed");
    }

    /// Check that a connection can be obtained.
    pub async fn is_available(&self) -> bool {
        self.run("PING", |mut conn| async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
        .is_ok()
    }
}

fn create_pool(config: &RedisConfig) -> Result<Pool> {
    let timeout = Some(config.timeout());

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let mut pool_config = redis_config.get_pool_config();
    pool_config.max_size = config.pool_size;
    pool_config.timeouts.wait = timeout;
    pool_config.timeouts.create = timeout;
    pool_config.timeouts.recycle = timeout;
    redis_config.pool = Some(pool_config);

    let pool = redis_config
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| CacheError::configuration(format!("failed to create Redis pool: {e}")))?;

    tracing::info!(url = %config.url, pool_size = config.pool_size, "Redis pool created");
    Ok(pool)
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.run("GET", |mut conn| async move {
            Ok(conn.get::<_, Option<Vec<u8>>>(key).await?)
        })
        .await
    }

    async fn set(&self, key: &str, payload: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.run("SET", |mut conn| async move {
            match ttl {
                // SETEX rejects 0, round sub-second TTLs up
                Some(ttl) => {
                    let secs = ttl.as_secs().max(1);
                    conn.set_ex::<_, _, ()>(key, payload, secs).await?
                }
                None => conn.set::<_, _, ()>(key, payload).await?,
            }
            Ok(())
        })
        .await
    }

    async fn del(&self, key: &str) -> Result<bool> {
        self.run("DEL", |mut conn| async move {
            let removed: i64 = conn.del(key).await?;
            Ok(removed > 0)
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.run("EXPIRE", |mut conn| async move {
            let secs = i64::try_from(ttl.as_secs().max(1)).unwrap_or(i64::MAX);
            conn.expire::<_, ()>(key, secs).await?;
            Ok(())
        })
        .await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.run("SADD", |mut conn| async move {
            conn.sadd::<_, _, ()>(key, member).await?;
            Ok(())
        })
        .await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.run("SMEMBERS", |mut conn| async move {
            let mut members: Vec<String> = conn.smembers(key).await?;
            members.sort();
            Ok(members)
        })
        .await
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        self.run("PUBLISH", |mut conn| async move {
            conn.publish::<_, _, ()>(channel, message).await?;
            Ok(())
        })
        .await
    }

    async fn psubscribe(&self, pattern: &str) -> Result<MessageStream> {
        let timeout = self.config.timeout();
        let url = self.config.url.clone();

        // Pub/sub needs a dedicated connection outside the pool
        let subscribe = async move {
            let client = redis::Client::open(url)?;
            let mut pubsub = client.get_async_pubsub().await?;
            pubsub.psubscribe(pattern).await?;
            Ok::<_, CacheError>(pubsub)
        };

        let pubsub = tokio::time::timeout(timeout, subscribe)
            .await
            .map_err(|_| {
                CacheError::store_unavailable(format!(
                    "Redis PSUBSCRIBE timed out after {}ms",
                    timeout.as_millis()
                ))
            })??;

        tracing::info!(pattern = %pattern, "subscribed to Redis channel pattern");

        let stream = pubsub.into_on_message().map(|msg| {
            InboundMessage::new(
                msg.get_channel_name(),
                String::from_utf8_lossy(msg.get_payload_bytes()).into_owned(),
            )
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_url_is_configuration_error() {
        let config = RedisConfig {
            url: String::new(),
            ..RedisConfig::default()
        };
        assert!(matches!(
            RedisStore::new(config),
            Err(CacheError::Configuration(_))
        ));
    }

    #[test]
    fn test_malformed_url_fails_at_construction() {
        let config = RedisConfig {
            url: "not a url".to_string(),
            ..RedisConfig::default()
        };
        assert!(matches!(
            RedisStore::new(config),
            Err(CacheError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_store_is_unavailable() {
        let config = RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
            timeout_ms: 200,
            ..RedisConfig::default()
        };
        let store = RedisStore::new(config).unwrap();

        let err = store.get("ECM_1.key").await.unwrap_err();
        assert!(matches!(err, CacheError::StoreUnavailable(_)));
        assert!(!store.is_available().await);
    }
}
