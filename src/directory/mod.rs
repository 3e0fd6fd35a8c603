//! User directory consumed by login and registration.
//!
//! Only the interface matters to the auth layer: look a principal up by any of
//! its login handles, create one, and compare a password against its stored
//! hash. Postgres is the production backend; `memory://` keeps users in
//! process for local development.

mod memory;
pub mod password;
mod postgres;

pub use self::memory::MemoryUserDirectory;
pub use self::postgres::PgUserDirectory;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use url::Url;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("username, email or phone already registered")]
    Conflict,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// A stored principal.
#[derive(Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub password_hash: String,
}

impl std::fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserRecord")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl UserRecord {
    /// Name shown to other users, falling back to the handle.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    /// Already normalized (trimmed, lowercased).
    pub email: String,
    pub password: SecretString,
    pub name: Option<String>,
    pub phone: Option<String>,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Match `identifier` against email (case-insensitive), username or phone.
    async fn find_by_login(&self, identifier: &str) -> Result<Option<UserRecord>, DirectoryError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, DirectoryError>;

    /// Hash the password and insert the user.
    ///
    /// Returns [`DirectoryError::Conflict`] when any unique handle is taken.
    async fn create(&self, user: NewUser) -> Result<UserRecord, DirectoryError>;

    async fn verify_password(
        &self,
        user: &UserRecord,
        password: &SecretString,
    ) -> Result<bool, DirectoryError>;

    async fn ping(&self) -> Result<(), DirectoryError>;
}

/// Build the directory named by `dsn`.
///
/// # Errors
/// Returns an error for unknown schemes or when the database cannot be reached.
pub async fn connect(dsn: &str) -> Result<Arc<dyn UserDirectory>> {
    let parsed = Url::parse(dsn).context("Invalid DSN")?;
    match parsed.scheme() {
        "memory" => {
            info!("Using in-process user directory");
            Ok(Arc::new(MemoryUserDirectory::new()))
        }
        "postgres" | "postgresql" => {
            let directory = PgUserDirectory::connect(dsn).await?;
            info!(
                host = parsed.host_str().unwrap_or("unknown"),
                "Connected to user directory"
            );
            Ok(Arc::new(directory))
        }
        scheme => bail!("Unsupported DSN scheme: {scheme}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: Option<&str>) -> UserRecord {
        UserRecord {
            id: Uuid::nil(),
            username: "ada".to_string(),
            email: "ada@example.com".to_string(),
            name: name.map(String::from),
            phone: None,
            password_hash: "$argon2id$secret".to_string(),
        }
    }

    #[test]
    fn display_name_falls_back_to_username() {
        assert_eq!(record(Some("Ada Lovelace")).display_name(), "Ada Lovelace");
        assert_eq!(record(Some("  ")).display_name(), "ada");
        assert_eq!(record(None).display_name(), "ada");
    }

    #[test]
    fn debug_hides_password_hash() {
        let debug = format!("{:?}", record(None));
        assert!(!debug.contains("argon2id"));
    }

    #[tokio::test]
    async fn connect_rejects_unknown_scheme() {
        assert!(connect("mysql://localhost/users").await.is_err());
    }

    #[tokio::test]
    async fn connect_memory_scheme() -> Result<()> {
        let directory = connect("memory://local").await?;
        directory.ping().await?;
        Ok(())
    }
}
