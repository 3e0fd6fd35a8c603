//! Fixed-window rate limiting backed by the shared cache.
//!
//! Flow Overview:
//! 1) Read the counter at `<class>:<identifier>`; at or over the limit means denied.
//! 2) Atomically increment it. Only the increment that returns 1 arms the
//!    window TTL, so later increments never push the window forward.
//! 3) Admission is decided on the value the increment returned, which keeps
//!    concurrent callers from overshooting the limit.
//!
//! Failure policy: when the cache is unreachable the limiter fails open and
//! logs the decision at `warn`. A counter holding something other than an
//! integer is deleted and the window starts over.

use crate::cache::{Cache, CacheError, Namespace};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

/// Counter families, each with its own key namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimiterClass {
    /// Login attempts per client; cleared on successful login.
    Login,
    Register,
    /// One-time code generation.
    Captcha,
    /// Generic throttling of the whole API surface.
    Api,
}

impl LimiterClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Register => "register",
            Self::Captcha => "captcha",
            Self::Api => "api",
        }
    }

    #[must_use]
    pub fn key(self, identifier: &str) -> String {
        match self {
            Self::Login => Namespace::LoginRateLimit.key(identifier),
            Self::Register => Namespace::RegisterRateLimit.key(identifier),
            Self::Captcha | Self::Api => {
                Namespace::RateLimit.key(&format!("{}:{identifier}", self.as_str()))
            }
        }
    }
}

/// Limit and window applied to one class of route.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub class: LimiterClass,
    pub limit: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    #[must_use]
    pub const fn new(class: LimiterClass, limit: u32, window: Duration) -> Self {
        Self {
            class,
            limit,
            window,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix epoch milliseconds at which the current window closes.
    pub reset_at_ms: i64,
}

impl RateLimitDecision {
    /// Whole seconds until the window closes, never less than one.
    #[must_use]
    pub fn retry_after_seconds(&self, now_ms: i64) -> u64 {
        let remaining_ms = u64::try_from(self.reset_at_ms.saturating_sub(now_ms)).unwrap_or(0);
        remaining_ms.div_ceil(1000).max(1)
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn Cache>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn window_millis(window_seconds: u64) -> i64 {
    i64::try_from(window_seconds.saturating_mul(1000)).unwrap_or(i64::MAX)
}

impl RateLimiter {
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    /// Apply `policy` to `identifier`.
    pub async fn check(&self, policy: &RateLimitPolicy, identifier: &str) -> RateLimitDecision {
        self.check_and_increment(
            policy.class,
            identifier,
            policy.limit,
            policy.window.as_secs(),
        )
        .await
    }

    /// Count one event for `identifier` and decide whether it is admitted.
    pub async fn check_and_increment(
        &self,
        class: LimiterClass,
        identifier: &str,
        limit: u32,
        window_seconds: u64,
    ) -> RateLimitDecision {
        let key = class.key(identifier);
        let now = now_millis();

        match self.count(&key, limit, window_seconds, now).await {
            Ok(decision) => {
                if !decision.allowed {
                    info!(
                        limiter = class.as_str(),
                        identifier,
                        reset_at_ms = decision.reset_at_ms,
                        "rate limit exceeded"
                    );
                }
                decision
            }
            Err(err) => {
                warn!(
                    limiter = class.as_str(),
                    identifier,
                    error = %err,
                    "rate limiter cache unavailable, failing open"
                );
                RateLimitDecision {
                    allowed: true,
                    limit,
                    remaining: limit,
                    reset_at_ms: now.saturating_add(window_millis(window_seconds)),
                }
            }
        }
    }

    /// Drop the counter, starting a fresh window on the next event.
    pub async fn clear(&self, class: LimiterClass, identifier: &str) {
        if let Err(err) = self.cache.del(&class.key(identifier)).await {
            warn!(
                limiter = class.as_str(),
                identifier,
                error = %err,
                "failed to clear rate limit counter"
            );
        }
    }

    async fn count(
        &self,
        key: &str,
        limit: u32,
        window_seconds: u64,
        now: i64,
    ) -> Result<RateLimitDecision, CacheError> {
        let limit_i64 = i64::from(limit);
        let current = match self.cache.get(key).await? {
            None => 0,
            Some(value) => match value.parse::<i64>() {
                Ok(current) => current,
                Err(_) => {
                    // INCRBY would reject it on every call; start a fresh window instead.
                    warn!(key, value = %value, "discarding corrupt rate limit counter");
                    self.cache.del(key).await?;
                    0
                }
            },
        };
        if current >= limit_i64 {
            let reset_at_ms = self.reset_at(key, window_seconds, now).await?;
            return Ok(denied(limit, reset_at_ms));
        }

        let count = self.cache.increment_by(key, 1).await?;
        let reset_at_ms = if count == 1 {
            self.cache.expire(key, window_seconds).await?;
            now.saturating_add(window_millis(window_seconds))
        } else {
            self.reset_at(key, window_seconds, now).await?
        };

        if count > limit_i64 {
            return Ok(denied(limit, reset_at_ms));
        }

        Ok(RateLimitDecision {
            allowed: true,
            limit,
            remaining: u32::try_from(limit_i64 - count).unwrap_or(0),
            reset_at_ms,
        })
    }

    async fn reset_at(&self, key: &str, window_seconds: u64, now: i64) -> Result<i64, CacheError> {
        let ttl = self.cache.ttl(key).await?;
        let seconds = if let Some(seconds) = ttl {
            seconds
        } else {
            // A counter without expiry would never reset; arm it now.
            self.cache.expire(key, window_seconds).await?;
            window_seconds
        };
        Ok(now.saturating_add(window_millis(seconds)))
    }
}

fn denied(limit: u32, reset_at_ms: i64) -> RateLimitDecision {
    RateLimitDecision {
        allowed: false,
        limit,
        remaining: 0,
        reset_at_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCache, testing::FailingCache};

    const WINDOW: u64 = 900;

    fn limiter() -> (RateLimiter, MemoryCache) {
        let cache = MemoryCache::new();
        (RateLimiter::new(Arc::new(cache.clone())), cache)
    }

    #[test]
    fn class_keys_use_namespaces() {
        assert_eq!(LimiterClass::Login.key("1.2.3.4"), "login_rate_limit:1.2.3.4");
        assert_eq!(LimiterClass::Register.key("1.2.3.4"), "register_rate_limit:1.2.3.4");
        assert_eq!(LimiterClass::Captcha.key("1.2.3.4"), "ratelimit:captcha:1.2.3.4");
        assert_eq!(LimiterClass::Api.key("1.2.3.4"), "ratelimit:api:1.2.3.4");
    }

    #[test]
    fn retry_after_rounds_up() {
        let decision = denied(5, 10_500);
        assert_eq!(decision.retry_after_seconds(9_000), 2);
        assert_eq!(decision.retry_after_seconds(10_500), 1);
        assert_eq!(decision.retry_after_seconds(20_000), 1);
    }

    #[tokio::test]
    async fn login_scenario_counts_down_then_denies() {
        let (limiter, _) = limiter();
        let start = now_millis();

        for expected in [4, 3, 2, 1, 0] {
            let decision = limiter
                .check_and_increment(LimiterClass::Login, "203.0.113.5", 5, WINDOW)
                .await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected);
        }

        let decision = limiter
            .check_and_increment(LimiterClass::Login, "203.0.113.5", 5, WINDOW)
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert!(decision.reset_at_ms >= start);
        assert!(decision.reset_at_ms <= now_millis() + 900_000);
    }

    #[tokio::test(start_paused = true)]
    async fn window_is_armed_once_and_expires() -> Result<(), CacheError> {
        let (limiter, cache) = limiter();
        let key = LimiterClass::Api.key("client");

        limiter
            .check_and_increment(LimiterClass::Api, "client", 3, 60)
            .await;
        tokio::time::advance(Duration::from_secs(40)).await;
        limiter
            .check_and_increment(LimiterClass::Api, "client", 3, 60)
            .await;
        // A later increment must not re-arm the timer.
        assert_eq!(cache.ttl(&key).await?, Some(20));

        limiter
            .check_and_increment(LimiterClass::Api, "client", 3, 60)
            .await;
        let denied = limiter
            .check_and_increment(LimiterClass::Api, "client", 3, 60)
            .await;
        assert!(!denied.allowed);

        tokio::time::advance(Duration::from_secs(20)).await;
        let fresh = limiter
            .check_and_increment(LimiterClass::Api, "client", 3, 60)
            .await;
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 2);
        assert_eq!(cache.ttl(&key).await?, Some(60));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_callers_admit_exactly_the_limit() {
        let (limiter, _) = limiter();
        let mut handles = Vec::new();
        for _ in 0..25 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .check_and_increment(LimiterClass::Register, "burst", 7, WINDOW)
                    .await
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if let Ok(decision) = handle.await {
                if decision.allowed {
                    allowed += 1;
                }
            }
        }
        assert_eq!(allowed, 7);
    }

    #[tokio::test]
    async fn clear_starts_a_new_window() {
        let (limiter, _) = limiter();
        for _ in 0..5 {
            limiter
                .check_and_increment(LimiterClass::Login, "ip", 5, WINDOW)
                .await;
        }
        limiter.clear(LimiterClass::Login, "ip").await;

        let decision = limiter
            .check_and_increment(LimiterClass::Login, "ip", 5, WINDOW)
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[tokio::test]
    async fn stuck_counter_without_ttl_is_rearmed() -> Result<(), CacheError> {
        let (limiter, cache) = limiter();
        let key = LimiterClass::Login.key("ip");
        cache.set(&key, "5", None).await?;

        let decision = limiter
            .check_and_increment(LimiterClass::Login, "ip", 5, WINDOW)
            .await;
        assert!(!decision.allowed);
        assert_eq!(cache.ttl(&key).await?, Some(WINDOW));
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_counter_starts_a_fresh_window() -> Result<(), CacheError> {
        let (limiter, cache) = limiter();
        let key = LimiterClass::Login.key("ip");
        cache.set(&key, "garbage", None).await?;

        let decision = limiter
            .check_and_increment(LimiterClass::Login, "ip", 2, WINDOW)
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
        assert_eq!(cache.get(&key).await?, Some("1".to_string()));
        assert_eq!(cache.ttl(&key).await?, Some(WINDOW));

        // Counting resumes, so the limit applies again.
        limiter
            .check_and_increment(LimiterClass::Login, "ip", 2, WINDOW)
            .await;
        let decision = limiter
            .check_and_increment(LimiterClass::Login, "ip", 2, WINDOW)
            .await;
        assert!(!decision.allowed);
        Ok(())
    }

    #[tokio::test]
    async fn identifiers_are_isolated() {
        let (limiter, _) = limiter();
        let policy = RateLimitPolicy::new(LimiterClass::Captcha, 1, Duration::from_secs(60));
        assert!(limiter.check(&policy, "a").await.allowed);
        assert!(!limiter.check(&policy, "a").await.allowed);
        assert!(limiter.check(&policy, "b").await.allowed);
    }

    #[tokio::test]
    async fn cache_outage_fails_open() {
        let limiter = RateLimiter::new(Arc::new(FailingCache));
        let decision = limiter
            .check_and_increment(LimiterClass::Login, "ip", 5, WINDOW)
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 5);

        // Clearing during an outage is logged, not raised.
        limiter.clear(LimiterClass::Login, "ip").await;
    }
}
