//! Shared cache client.
//!
//! Every other auth component keeps its state in one remote key/value store so
//! that independent request handlers (and independent processes) agree on it.
//! The [`Cache`] trait is the whole contract: plain GET/SET/DEL plus an atomic
//! `increment_by`, TTL control and existence checks.
//!
//! Calls never retry. A failed or timed-out call surfaces as a [`CacheError`]
//! and the caller decides whether that means fail-open or fail-closed.
//!
//! Key namespaces are part of the contract: see [`Namespace`].

mod memory;
mod remote;

pub use self::memory::MemoryCache;
pub use self::remote::RedisCache;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cache call timed out after {0:?}")]
    Timeout(Duration),
    #[error("cache rejected command: {0}")]
    Command(String),
}

/// Key/value operations the auth layer relies on.
///
/// All operations are idempotent from the caller's point of view except
/// [`Cache::increment_by`], which must be a single atomic server-side operation.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `value`, replacing any previous value and TTL.
    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: Option<u64>,
    ) -> Result<(), CacheError>;

    /// Replace the value and TTL of `key` only if it still exists.
    ///
    /// Returns `false`, writing nothing, when the key is absent or expired.
    async fn set_if_exists(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<bool, CacheError>;

    async fn del(&self, key: &str) -> Result<(), CacheError>;

    /// Atomically add `n` and return the new value. Missing keys start at 0 and
    /// an existing TTL is left untouched.
    async fn increment_by(&self, key: &str, n: i64) -> Result<i64, CacheError>;

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<(), CacheError>;

    /// Remaining lifetime in seconds, `None` when the key is absent or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<u64>, CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

/// Key prefixes owned by each component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Namespace {
    Session,
    LoginRateLimit,
    RegisterRateLimit,
    RateLimit,
    Captcha,
}

impl Namespace {
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::LoginRateLimit => "login_rate_limit",
            Self::RegisterRateLimit => "register_rate_limit",
            Self::RateLimit => "ratelimit",
            Self::Captcha => "captcha",
        }
    }

    #[must_use]
    pub fn key(self, id: &str) -> String {
        format!("{}:{id}", self.prefix())
    }
}

/// Build the cache client named by `url`.
///
/// `redis://` and `rediss://` connect to a remote store, `memory://` keeps
/// everything in this process (single-instance development only).
///
/// An unreachable remote store is logged and does not fail startup; calls
/// report [`CacheError`] until it comes back.
///
/// # Errors
/// Returns an error for malformed URLs or unknown schemes.
pub async fn connect(url: &str, timeout: Duration) -> Result<Arc<dyn Cache>> {
    let parsed = Url::parse(url).context("Invalid cache URL")?;
    match parsed.scheme() {
        "memory" => {
            info!("Using in-process memory cache");
            Ok(Arc::new(MemoryCache::new()))
        }
        "redis" | "rediss" => {
            let cache = RedisCache::open(url, timeout).context("Invalid cache URL")?;
            let host = parsed.host_str().unwrap_or("unknown");
            match cache.ping().await {
                Ok(()) => info!(host, "Connected to cache"),
                Err(err) => warn!(host, "Cache unreachable, starting degraded: {err}"),
            }
            Ok(Arc::new(cache))
        }
        scheme => bail!("Unsupported cache URL scheme: {scheme}"),
    }
}
