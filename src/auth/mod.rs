//! Authentication and abuse control.
//!
//! Components share nothing in-process; all state lives in the shared cache
//! under per-component key namespaces:
//!
//! - [`token`]: stateless signed credentials.
//! - [`session`]: one live session per principal, the revocation point.
//! - [`rate_limit`]: fixed-window counters, fail-open.
//! - [`captcha`]: single-use verification codes.
//! - [`gate`]: the one credential state machine every protected route runs, fail-closed.

pub mod captcha;
pub mod cookies;
pub mod gate;
pub mod rate_limit;
pub mod session;
pub mod token;

use self::{
    captcha::{CodeDelivery, OneTimeCodeStore},
    gate::RequestGate,
    rate_limit::{LimiterClass, RateLimitPolicy, RateLimiter},
    session::SessionStore,
    token::{TokenLifetime, TokenService},
};
use crate::{cache::Cache, directory::UserDirectory};
use std::{sync::Arc, time::Duration};

const DEFAULT_TOKEN_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_REMEMBER_TTL_SECONDS: u64 = 30 * 24 * 60 * 60;
const DEFAULT_CAPTCHA_TTL_SECONDS: u64 = 5 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    token_ttl_seconds: u64,
    remember_ttl_seconds: u64,
    captcha_ttl_seconds: u64,
    expose_captcha_code: bool,
    login_policy: RateLimitPolicy,
    register_policy: RateLimitPolicy,
    captcha_policy: RateLimitPolicy,
    api_policy: RateLimitPolicy,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            remember_ttl_seconds: DEFAULT_REMEMBER_TTL_SECONDS,
            captcha_ttl_seconds: DEFAULT_CAPTCHA_TTL_SECONDS,
            expose_captcha_code: false,
            login_policy: RateLimitPolicy::new(LimiterClass::Login, 5, Duration::from_secs(900)),
            register_policy: RateLimitPolicy::new(
                LimiterClass::Register,
                3,
                Duration::from_secs(3600),
            ),
            captcha_policy: RateLimitPolicy::new(LimiterClass::Captcha, 5, Duration::from_secs(300)),
            api_policy: RateLimitPolicy::new(LimiterClass::Api, 100, Duration::from_secs(60)),
        }
    }

    #[must_use]
    pub fn with_token_ttl_seconds(mut self, seconds: u64) -> Self {
        self.token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_remember_ttl_seconds(mut self, seconds: u64) -> Self {
        self.remember_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_captcha_ttl_seconds(mut self, seconds: u64) -> Self {
        self.captcha_ttl_seconds = seconds;
        self
    }

    /// Return generated codes in the HTTP response. Development only.
    #[must_use]
    pub fn with_expose_captcha_code(mut self, expose: bool) -> Self {
        self.expose_captcha_code = expose;
        self
    }

    /// Replace the policy for `policy.class`.
    #[must_use]
    pub fn with_policy(mut self, policy: RateLimitPolicy) -> Self {
        match policy.class {
            LimiterClass::Login => self.login_policy = policy,
            LimiterClass::Register => self.register_policy = policy,
            LimiterClass::Captcha => self.captcha_policy = policy,
            LimiterClass::Api => self.api_policy = policy,
        }
        self
    }

    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_seconds)
    }

    #[must_use]
    pub fn remember_ttl(&self) -> Duration {
        Duration::from_secs(self.remember_ttl_seconds)
    }

    #[must_use]
    pub fn captcha_ttl_seconds(&self) -> u64 {
        self.captcha_ttl_seconds
    }

    #[must_use]
    pub fn expose_captcha_code(&self) -> bool {
        self.expose_captcha_code
    }

    #[must_use]
    pub fn policy(&self, class: LimiterClass) -> &RateLimitPolicy {
        match class {
            LimiterClass::Login => &self.login_policy,
            LimiterClass::Register => &self.register_policy,
            LimiterClass::Captcha => &self.captcha_policy,
            LimiterClass::Api => &self.api_policy,
        }
    }
}

/// Everything request handlers need, shared behind an `Arc`.
pub struct AuthState {
    config: AuthConfig,
    cache: Arc<dyn Cache>,
    tokens: Arc<TokenService>,
    sessions: SessionStore,
    limiter: RateLimiter,
    codes: OneTimeCodeStore,
    gate: RequestGate,
    directory: Arc<dyn UserDirectory>,
    delivery: Arc<dyn CodeDelivery>,
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AuthState {
    pub fn new(
        config: AuthConfig,
        cache: Arc<dyn Cache>,
        tokens: TokenService,
        directory: Arc<dyn UserDirectory>,
        delivery: Arc<dyn CodeDelivery>,
    ) -> Self {
        let tokens = Arc::new(tokens);
        let sessions = SessionStore::new(cache.clone());
        Self {
            config,
            limiter: RateLimiter::new(cache.clone()),
            codes: OneTimeCodeStore::new(cache.clone()),
            gate: RequestGate::new(tokens.clone(), sessions.clone()),
            cache,
            tokens,
            sessions,
            directory,
            delivery,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &dyn Cache {
        self.cache.as_ref()
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    #[must_use]
    pub fn codes(&self) -> &OneTimeCodeStore {
        &self.codes
    }

    #[must_use]
    pub fn gate(&self) -> &RequestGate {
        &self.gate
    }

    #[must_use]
    pub fn directory(&self) -> &dyn UserDirectory {
        self.directory.as_ref()
    }

    #[must_use]
    pub fn delivery(&self) -> &dyn CodeDelivery {
        self.delivery.as_ref()
    }

    /// Session TTL matching the token lifetime chosen at login.
    #[must_use]
    pub fn session_ttl_seconds(&self, lifetime: TokenLifetime) -> u64 {
        self.tokens.lifetime(lifetime).as_secs()
    }
}
