//! One-time verification codes.
//!
//! A code lives at `captcha:<owner_key>` with a short TTL. Generating again
//! overwrites the previous code, so at most one is outstanding per owner. A
//! successful match deletes the code right after the read; the window between
//! read and delete makes single use best-effort, not atomic.

use crate::cache::{Cache, CacheError, Namespace};
use anyhow::Result;
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};
use utoipa::ToSchema;

const CODE_RANGE: std::ops::RangeInclusive<u32> = 100_000..=999_999;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    Match,
    /// Wrong code; the stored one stays valid for another attempt.
    Mismatch,
    /// No code stored, either never generated, expired or already used.
    Expired,
}

/// A submitted code, as text or as a JSON number.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum CodeInput {
    Text(String),
    Number(u64),
}

impl CodeInput {
    #[must_use]
    pub fn normalized(&self) -> String {
        match self {
            Self::Text(text) => text.trim().to_string(),
            Self::Number(number) => number.to_string(),
        }
    }
}

impl From<&str> for CodeInput {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<u64> for CodeInput {
    fn from(value: u64) -> Self {
        Self::Number(value)
    }
}

/// Out-of-band delivery of a freshly generated code (email, SMS, ...).
pub trait CodeDelivery: Send + Sync {
    /// Hand `code` to the owner. The code stays valid even if this fails.
    ///
    /// # Errors
    /// Returns an error if the code could not be handed off.
    fn deliver(&self, owner_key: &str, code: &str) -> Result<()>;
}

/// Local dev delivery that only logs.
#[derive(Clone, Debug, Default)]
pub struct LogCodeDelivery {
    reveal_code: bool,
}

impl LogCodeDelivery {
    #[must_use]
    pub fn new(reveal_code: bool) -> Self {
        Self { reveal_code }
    }
}

impl CodeDelivery for LogCodeDelivery {
    fn deliver(&self, owner_key: &str, code: &str) -> Result<()> {
        if self.reveal_code {
            info!(owner_key, code, "one-time code delivery stub");
        } else {
            info!(owner_key, "one-time code delivery stub");
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct OneTimeCodeStore {
    cache: Arc<dyn Cache>,
}

impl std::fmt::Debug for OneTimeCodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneTimeCodeStore").finish_non_exhaustive()
    }
}

impl OneTimeCodeStore {
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    /// Store a new 6-digit code for `owner_key`, replacing any earlier one.
    ///
    /// # Errors
    /// Returns an error if the code cannot be stored; no code is issued then.
    pub async fn generate(&self, owner_key: &str, ttl_seconds: u64) -> Result<String, CacheError> {
        let code = rand::thread_rng().gen_range(CODE_RANGE).to_string();
        self.cache
            .set(&Namespace::Captcha.key(owner_key), &code, Some(ttl_seconds))
            .await?;
        debug!(owner_key, ttl_seconds, "one-time code stored");
        Ok(code)
    }

    /// Compare `supplied` against the stored code, consuming it on a match.
    ///
    /// # Errors
    /// Returns an error if the cache cannot be read, or if a matching code
    /// could not be deleted (the code is then still valid).
    pub async fn verify(
        &self,
        owner_key: &str,
        supplied: &CodeInput,
    ) -> Result<VerifyOutcome, CacheError> {
        let key = Namespace::Captcha.key(owner_key);
        let Some(stored) = self.cache.get(&key).await? else {
            return Ok(VerifyOutcome::Expired);
        };

        if stored.trim() != supplied.normalized() {
            debug!(owner_key, "one-time code mismatch");
            return Ok(VerifyOutcome::Mismatch);
        }

        self.cache.del(&key).await?;
        debug!(owner_key, "one-time code consumed");
        Ok(VerifyOutcome::Match)
    }
}
