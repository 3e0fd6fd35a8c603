//! Postgres-backed user directory over the `users` table (`sql/schema.sql`).

use super::{
    DirectoryError, NewUser, UserDirectory, UserRecord,
    password::{hash_password_blocking, verify_password_blocking},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::SecretString;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::{Instrument, info_span};
use uuid::Uuid;

const USER_COLUMNS: &str = "id, username, email, name, phone, password_hash";

#[derive(Clone, Debug)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    /// # Errors
    /// Returns an error if the database cannot be reached.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPool::connect(dsn)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_span(operation: &'static str, statement: &str) -> tracing::Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn user_from_row(row: &PgRow) -> Result<UserRecord, sqlx::Error> {
    Ok(UserRecord {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        password_hash: row.try_get("password_hash")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_login(&self, identifier: &str) -> Result<Option<UserRecord>, DirectoryError> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE email = lower($1) OR username = $1 OR phone = $1 \
             LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(identifier.trim())
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, DirectoryError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn create(&self, user: NewUser) -> Result<UserRecord, DirectoryError> {
        let password_hash = hash_password_blocking(user.password).await?;
        let query = format!(
            "INSERT INTO users (id, username, email, name, phone, password_hash) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {USER_COLUMNS}"
        );
        let result = sqlx::query(&query)
            .bind(Uuid::now_v7())
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.name)
            .bind(&user.phone)
            .bind(&password_hash)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await;

        match result {
            Ok(row) => Ok(user_from_row(&row)?),
            Err(err) if is_unique_violation(&err) => Err(DirectoryError::Conflict),
            Err(err) => Err(err.into()),
        }
    }

    async fn verify_password(
        &self,
        user: &UserRecord,
        password: &SecretString,
    ) -> Result<bool, DirectoryError> {
        verify_password_blocking(user.password_hash.clone(), password.clone()).await
    }

    async fn ping(&self) -> Result<(), DirectoryError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .instrument(db_span("SELECT", "SELECT 1"))
            .await?;
        Ok(())
    }
}
