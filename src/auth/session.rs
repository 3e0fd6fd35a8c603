//! Server-side session records.
//!
//! One record per principal at `session:<principal_id>`. Presence of the key is
//! the only proof that a session is live; the stored metadata is advisory and
//! never used for authorization. `create` and `touch` always write a fresh
//! absolute TTL, and concurrent `touch` calls are last-write-wins for the
//! metadata. A `touch` never recreates a key that `destroy` removed.

use crate::cache::{Cache, CacheError, Namespace};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("corrupt session record")]
    Corrupt(#[from] serde_json::Error),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionMetadata {
    pub remember: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub principal_id: String,
    /// Unix epoch milliseconds.
    pub login_at: i64,
    pub remember: bool,
    /// Unix epoch milliseconds.
    pub last_activity_at: i64,
}

#[derive(Clone)]
pub struct SessionStore {
    cache: Arc<dyn Cache>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl SessionStore {
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    /// Replace any session of `principal_id` with a new one.
    ///
    /// # Errors
    /// Returns an error if the record cannot be written.
    pub async fn create(
        &self,
        principal_id: &str,
        metadata: SessionMetadata,
        ttl_seconds: u64,
    ) -> Result<SessionRecord, SessionError> {
        let now = now_millis();
        let record = SessionRecord {
            principal_id: principal_id.to_string(),
            login_at: now,
            remember: metadata.remember,
            last_activity_at: now,
        };
        self.write(&record, ttl_seconds).await?;
        debug!(principal_id, ttl_seconds, "session created");
        Ok(record)
    }

    /// Record activity and restart the TTL of a live session.
    ///
    /// # Errors
    /// Returns [`SessionError::NotFound`] if there is no live session.
    pub async fn touch(
        &self,
        principal_id: &str,
        ttl_seconds: u64,
    ) -> Result<SessionRecord, SessionError> {
        let record = self.get(principal_id).await?.ok_or(SessionError::NotFound)?;
        self.renew(record, ttl_seconds).await
    }

    /// Write back an already loaded record with fresh activity and TTL.
    ///
    /// The write only applies while the session key still exists.
    ///
    /// # Errors
    /// Returns [`SessionError::NotFound`] if the session ended after `record`
    /// was loaded, or an error if the record cannot be written.
    pub async fn renew(
        &self,
        mut record: SessionRecord,
        ttl_seconds: u64,
    ) -> Result<SessionRecord, SessionError> {
        record.last_activity_at = now_millis();
        let value = serde_json::to_string(&record)?;
        let applied = self
            .cache
            .set_if_exists(
                &Namespace::Session.key(&record.principal_id),
                &value,
                ttl_seconds,
            )
            .await?;
        if !applied {
            debug!(principal_id = %record.principal_id, "session ended before renewal");
            return Err(SessionError::NotFound);
        }
        Ok(record)
    }

    /// # Errors
    /// Returns an error if the cache cannot be queried.
    pub async fn exists(&self, principal_id: &str) -> Result<bool, SessionError> {
        Ok(self.cache.exists(&Namespace::Session.key(principal_id)).await?)
    }

    /// # Errors
    /// Returns an error if the cache cannot be queried or the record is unreadable.
    pub async fn get(&self, principal_id: &str) -> Result<Option<SessionRecord>, SessionError> {
        let Some(raw) = self.cache.get(&Namespace::Session.key(principal_id)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// # Errors
    /// Returns an error if the cache cannot be reached.
    pub async fn destroy(&self, principal_id: &str) -> Result<(), SessionError> {
        self.cache.del(&Namespace::Session.key(principal_id)).await?;
        debug!(principal_id, "session destroyed");
        Ok(())
    }

    async fn write(&self, record: &SessionRecord, ttl_seconds: u64) -> Result<(), SessionError> {
        let value = serde_json::to_string(record)?;
        self.cache
            .set(
                &Namespace::Session.key(&record.principal_id),
                &value,
                Some(ttl_seconds),
            )
            .await?;
        Ok(())
    }
}
