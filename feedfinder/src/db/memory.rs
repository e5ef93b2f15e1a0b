//! In-memory user repository for tests and `--memory` development runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::repository::UserRepository;
use crate::auth::{AuthError, AuthResult, NewUser, User, UserId, UserRole, UserUpdate};

#[derive(Default)]
struct Users {
    rows: HashMap<UserId, User>,
    next_id: UserId,
}

/// `UserRepository` over a map, with the same uniqueness rules as the table
#[derive(Clone, Default)]
pub struct MemoryUserRepository {
    inner: Arc<RwLock<Users>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Change a username in place
    pub async fn rename(&self, user_id: UserId, username: &str) {
        if let Some(user) = self.inner.write().await.rows.get_mut(&user_id) {
            user.username = username.to_string();
        }
    }

    /// Delete a user row
    pub async fn remove(&self, user_id: UserId) {
        self.inner.write().await.rows.remove(&user_id);
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn create_user(&self, new: &NewUser) -> AuthResult<User> {
        let mut users = self.inner.write().await;

        if users.rows.values().any(|u| u.username == new.username) {
            return Err(AuthError::UsernameTaken);
        }
        if users
            .rows
            .values()
            .any(|u| u.email.as_deref() == Some(new.email.as_str()))
        {
            return Err(AuthError::EmailTaken);
        }

        users.next_id += 1;
        let user = User {
            id: users.next_id,
            username: new.username.clone(),
            email: Some(new.email.clone()),
            password_hash: new.password_hash.clone(),
            role: UserRole::User,
            bio: new.bio.clone(),
            is_private: new.is_private,
            created_at: Utc::now(),
            last_login: None,
        };
        users.rows.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> AuthResult<Option<User>> {
        let users = self.inner.read().await;
        Ok(users.rows.values().find(|u| u.username == username).cloned())
    }

    async fn find_by_email(&self, email: &str) -> AuthResult<Option<User>> {
        let users = self.inner.read().await;
        Ok(users
            .rows
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn find_by_id(&self, user_id: UserId) -> AuthResult<Option<User>> {
        Ok(self.inner.read().await.rows.get(&user_id).cloned())
    }

    async fn update_user(&self, user_id: UserId, update: &UserUpdate) -> AuthResult<()> {
        let mut users = self.inner.write().await;
        let user = users.rows.get_mut(&user_id).ok_or(AuthError::UserNotFound)?;

        if let Some(email) = &update.email {
            user.email = Some(email.clone());
        }
        if let Some(hash) = &update.password_hash {
            user.password_hash = hash.clone();
        }
        if let Some(role) = update.role {
            user.role = role;
        }
        if let Some(bio) = &update.bio {
            user.bio = bio.clone();
        }
        if let Some(is_private) = update.is_private {
            user.is_private = is_private;
        }
        Ok(())
    }

    async fn touch_last_login(&self, user_id: UserId) -> AuthResult<()> {
        if let Some(user) = self.inner.write().await.rows.get_mut(&user_id) {
            user.last_login = Some(Utc::now());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
            bio: String::new(),
            is_private: false,
        }
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let repo = MemoryUserRepository::new();
        let user = repo.create_user(&new_user("alice", "a@example.com")).await.unwrap();

        assert_eq!(user.role, UserRole::User);
        assert_eq!(
            repo.find_by_username("alice").await.unwrap().unwrap().id,
            user.id
        );
        assert_eq!(
            repo.find_by_email("a@example.com").await.unwrap().unwrap().id,
            user.id
        );
        assert!(repo.find_by_id(user.id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_uniqueness() {
        let repo = MemoryUserRepository::new();
        repo.create_user(&new_user("alice", "a@example.com")).await.unwrap();

        assert!(matches!(
            repo.create_user(&new_user("alice", "other@example.com")).await,
            Err(AuthError::UsernameTaken)
        ));
        assert!(matches!(
            repo.create_user(&new_user("bob", "a@example.com")).await,
            Err(AuthError::EmailTaken)
        ));
    }

    #[tokio::test]
    async fn test_partial_update() {
        let repo = MemoryUserRepository::new();
        let user = repo.create_user(&new_user("alice", "a@example.com")).await.unwrap();

        repo.update_user(
            user.id,
            &UserUpdate {
                role: Some(UserRole::Admin),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let updated = repo.find_by_id(user.id).await.unwrap().unwrap();
        assert!(updated.role.is_admin());
        assert_eq!(updated.password_hash, "hash");

        assert!(matches!(
            repo.update_user(999, &UserUpdate::default()).await,
            Err(AuthError::UserNotFound)
        ));
    }
}
