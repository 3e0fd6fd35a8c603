//! In-process cache with the same semantics as the remote store.
//!
//! Used by tests and by single-instance development setups (`memory://`).
//! Expiry follows `tokio::time`, so paused test clocks drive TTLs too.

use super::{Cache, CacheError};
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::Instant};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn deadline(now: Instant, ttl_seconds: u64) -> Instant {
    now + Duration::from_secs(ttl_seconds)
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.is_live(now));
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: Option<u64>,
    ) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl_seconds.map(|seconds| deadline(now, seconds)),
            },
        );
        Ok(())
    }

    async fn set_if_exists(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(key).filter(|entry| entry.is_live(now)) else {
            return Ok(false);
        };
        entry.value = value.to_string();
        entry.expires_at = Some(deadline(now, ttl_seconds));
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn increment_by(&self, key: &str, n: i64) -> Result<i64, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.is_live(now));

        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at: None,
        });
        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| CacheError::Command("value is not an integer".to_string()))?;
        let next = current
            .checked_add(n)
            .ok_or_else(|| CacheError::Command("increment would overflow".to_string()))?;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(key).filter(|entry| entry.is_live(now)) {
            entry.expires_at = Some(deadline(now, ttl_seconds));
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, CacheError> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| {
                // Round up like the remote store so a live key never reports 0s.
                let remaining = at.saturating_duration_since(now);
                remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)
            }))
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(entries.get(key).is_some_and(|entry| entry.is_live(now)))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
