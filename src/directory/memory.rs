use super::{
    DirectoryError, NewUser, UserDirectory, UserRecord,
    password::{hash_password_blocking, verify_password_blocking},
};
use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-process directory, for tests and single-instance development.
#[derive(Clone, Debug, Default)]
pub struct MemoryUserDirectory {
    users: Arc<RwLock<Vec<UserRecord>>>,
}

impl MemoryUserDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_login(user: &UserRecord, identifier: &str) -> bool {
    user.email.eq_ignore_ascii_case(identifier)
        || user.username == identifier
        || user.phone.as_deref() == Some(identifier)
}

fn collides(existing: &UserRecord, user: &NewUser) -> bool {
    existing.username == user.username
        || existing.email == user.email
        || (user.phone.is_some() && existing.phone == user.phone)
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_login(&self, identifier: &str) -> Result<Option<UserRecord>, DirectoryError> {
        let identifier = identifier.trim();
        let users = self.users.read().await;
        Ok(users
            .iter()
            .find(|user| matches_login(user, identifier))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, DirectoryError> {
        let users = self.users.read().await;
        Ok(users.iter().find(|user| user.id == id).cloned())
    }

    async fn create(&self, user: NewUser) -> Result<UserRecord, DirectoryError> {
        if self.users.read().await.iter().any(|u| collides(u, &user)) {
            return Err(DirectoryError::Conflict);
        }
        let password_hash = hash_password_blocking(user.password.clone()).await?;

        let mut users = self.users.write().await;
        // Re-check under the write lock; another create may have won.
        if users.iter().any(|u| collides(u, &user)) {
            return Err(DirectoryError::Conflict);
        }
        let record = UserRecord {
            id: Uuid::now_v7(),
            username: user.username,
            email: user.email,
            name: user.name,
            phone: user.phone,
            password_hash,
        };
        users.push(record.clone());
        Ok(record)
    }

    async fn verify_password(
        &self,
        user: &UserRecord,
        password: &SecretString,
    ) -> Result<bool, DirectoryError> {
        verify_password_blocking(user.password_hash.clone(), password.clone()).await
    }

    async fn ping(&self) -> Result<(), DirectoryError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(username: &str, email: &str, phone: Option<&str>) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: email.to_string(),
            password: SecretString::from("hunter22"),
            name: None,
            phone: phone.map(String::from),
        }
    }

    #[tokio::test]
    async fn create_and_find_by_every_handle() -> Result<(), DirectoryError> {
        let directory = MemoryUserDirectory::new();
        let created = directory
            .create(new_user("ada", "ada@example.com", Some("+15550100")))
            .await?;

        for identifier in ["ada", "ADA@example.com", "+15550100", " ada "] {
            let found = directory.find_by_login(identifier).await?;
            assert_eq!(found.map(|u| u.id), Some(created.id), "{identifier}");
        }
        assert_eq!(directory.find_by_login("nobody").await?, None);
        assert_eq!(
            directory.find_by_id(created.id).await?.map(|u| u.username),
            Some("ada".to_string())
        );
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_handles_conflict() -> Result<(), DirectoryError> {
        let directory = MemoryUserDirectory::new();
        directory
            .create(new_user("ada", "ada@example.com", None))
            .await?;

        assert!(matches!(
            directory.create(new_user("ada", "other@example.com", None)).await,
            Err(DirectoryError::Conflict)
        ));
        assert!(matches!(
            directory.create(new_user("other", "ada@example.com", None)).await,
            Err(DirectoryError::Conflict)
        ));
        // Two users without a phone do not collide on it.
        directory
            .create(new_user("grace", "grace@example.com", None))
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn password_check() -> Result<(), DirectoryError> {
        let directory = MemoryUserDirectory::new();
        let user = directory
            .create(new_user("ada", "ada@example.com", None))
            .await?;

        assert!(
            directory
                .verify_password(&user, &SecretString::from("hunter22"))
                .await?
        );
        assert!(
            !directory
                .verify_password(&user, &SecretString::from("hunter2"))
                .await?
        );
        Ok(())
    }
}
