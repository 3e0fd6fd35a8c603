//! Redis-compatible remote cache.

use super::{Cache, CacheError};
use ::redis::{AsyncCommands, Client, RedisError, RedisResult, aio::ConnectionManager};
use async_trait::async_trait;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{sync::OnceCell, time::timeout};
use tracing::{Instrument, info_span};

/// Remote cache backed by a multiplexed, auto-reconnecting connection.
///
/// The connection is established on first use, so the process starts while
/// the store is down and recovers once it comes back. Every command, including
/// that first connect, is bounded by `timeout`; a timed-out command is reported
/// as [`CacheError::Timeout`] and is never retried here.
#[derive(Clone)]
pub struct RedisCache {
    client: Client,
    manager: Arc<OnceCell<ConnectionManager>>,
    timeout: Duration,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("connected", &self.manager.initialized())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Prepare a client for `url` without touching the network.
    ///
    /// # Errors
    /// Returns an error if the URL is not a valid Redis URL.
    pub fn open(url: &str, timeout_after: Duration) -> Result<Self, CacheError> {
        let client = Client::open(url).map_err(map_error)?;
        Ok(Self {
            client,
            manager: Arc::new(OnceCell::new()),
            timeout: timeout_after,
        })
    }

    async fn connection(&self) -> RedisResult<ConnectionManager> {
        self.manager
            .get_or_try_init(|| self.client.get_connection_manager())
            .await
            .cloned()
    }

    async fn call<T, F, Fut>(&self, operation: &'static str, command: F) -> Result<T, CacheError>
    where
        F: FnOnce(ConnectionManager) -> Fut + Send,
        Fut: Future<Output = RedisResult<T>> + Send,
        T: Send,
    {
        let span = info_span!("cache.command", db.system = "redis", db.operation = operation);
        let bounded = async {
            let connection = self.connection().await?;
            command(connection).await
        };

        match timeout(self.timeout, bounded).instrument(span).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(map_error(err)),
            Err(_) => Err(CacheError::Timeout(self.timeout)),
        }
    }
}

fn map_error(err: RedisError) -> CacheError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        CacheError::Unavailable(err.to_string())
    } else if err.is_timeout() {
        CacheError::Unavailable(format!("timeout: {err}"))
    } else {
        CacheError::Command(err.to_string())
    }
}

fn ttl_from_reply(reply: i64) -> Option<u64> {
    // -2: missing key, -1: key without expiry
    u64::try_from(reply).ok()
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.call("GET", |mut conn| async move {
            conn.get::<_, Option<String>>(key).await
        })
        .await
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: Option<u64>,
    ) -> Result<(), CacheError> {
        match ttl_seconds {
            Some(seconds) => {
                self.call("SETEX", |mut conn| async move {
                    conn.set_ex::<_, _, ()>(key, value, seconds).await
                })
                .await
            }
            None => {
                self.call("SET", |mut conn| async move {
                    conn.set::<_, _, ()>(key, value).await
                })
                .await
            }
        }
    }

    async fn set_if_exists(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<bool, CacheError> {
        self.call("SET", |mut conn| async move {
            // Nil reply: the key was gone and nothing was written.
            let reply: Option<String> = ::redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("XX")
                .arg("EX")
                .arg(ttl_seconds)
                .query_async(&mut conn)
                .await?;
            Ok(reply.is_some())
        })
        .await
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.call("DEL", |mut conn| async move {
            conn.del::<_, i64>(key).await
        })
        .await
        .map(|_| ())
    }

    async fn increment_by(&self, key: &str, n: i64) -> Result<i64, CacheError> {
        self.call("INCRBY", |mut conn| async move {
            conn.incr::<_, _, i64>(key, n).await
        })
        .await
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        let seconds = i64::try_from(ttl_seconds).unwrap_or(i64::MAX);
        self.call("EXPIRE", |mut conn| async move {
            conn.expire::<_, bool>(key, seconds).await
        })
        .await
        .map(|_| ())
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, CacheError> {
        self.call("TTL", |mut conn| async move {
            conn.ttl::<_, i64>(key).await
        })
        .await
        .map(ttl_from_reply)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.call("EXISTS", |mut conn| async move {
            conn.exists::<_, bool>(key).await
        })
        .await
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.call("PING", |mut conn| async move {
            let pong: String = ::redis::cmd("PING").query_async(&mut conn).await?;
            Ok(pong)
        })
        .await
        .map(|_| ())
    }
}
