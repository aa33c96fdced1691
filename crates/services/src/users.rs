//! Accounts, credentials and principal resolution.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use domains::{
    DomainError, FileUpload, MediaStorage, MediaType, PasswordHasher, Principal, ProfileUpdate,
    Result, TokenService, User, UserRepository,
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::validation::{self, MAX_BIO_LEN};

pub const USER_SEARCH_LIMIT: u64 = 20;

/// Returned by register and login.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub user: User,
    pub token: String,
}

/// What other users may see about an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    pub id: Uuid,
    pub username: String,
    pub avatar: Option<String>,
    pub bio: String,
    pub reputation: i64,
    pub created_at: DateTime<Utc>,
}

impl From<User> for PublicProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            avatar: user.avatar,
            bio: user.bio,
            reputation: user.reputation,
            created_at: user.created_at,
        }
    }
}

pub struct UserService {
    users: Arc<dyn UserRepository>,
    hasher: Arc<dyn PasswordHasher>,
    tokens: Arc<dyn TokenService>,
    storage: Arc<dyn MediaStorage>,
}

impl UserService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        hasher: Arc<dyn PasswordHasher>,
        tokens: Arc<dyn TokenService>,
        storage: Arc<dyn MediaStorage>,
    ) -> Self {
        Self {
            users,
            hasher,
            tokens,
            storage,
        }
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthSession> {
        let username = validation::username(username)?;
        let email = validation::email(email)?;
        validation::password(password)?;

        if self.users.find_user_by_email(&email).await?.is_some() {
            return Err(DomainError::conflict("user already exists"));
        }
        if self.users.find_user_by_username(&username).await?.is_some() {
            return Err(DomainError::conflict("username already taken"));
        }

        let hash = self.hasher.hash_password(password).await?;
        let user = self.users.create_user(User::new(username, email, hash)).await?;
        info!(user_id = %user.id, username = %user.username, "user registered");
        let token = self.tokens.issue(user.id)?;
        Ok(AuthSession { user, token })
    }

    /// Unknown email, wrong password and deactivated accounts all look the same.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession> {
        let invalid = || DomainError::unauthorized("invalid credentials");
        let email = email.trim().to_lowercase();
        let user = self
            .users
            .find_user_by_email(&email)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(invalid)?;
        if !self.hasher.verify_password(password, &user.password_hash).await? {
            return Err(invalid());
        }
        info!(user_id = %user.id, "user logged in");
        let token = self.tokens.issue(user.id)?;
        Ok(AuthSession { user, token })
    }

    /// Bearer token to principal. The account must still exist and be active.
    pub async fn authenticate(&self, token: &str) -> Result<Principal> {
        let user_id = self.tokens.verify(token)?;
        let user = self
            .users
            .find_user(user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| DomainError::unauthorized("account not found or inactive"))?;
        Ok(Principal {
            id: user.id,
            is_admin: user.is_admin,
        })
    }

    pub async fn me(&self, principal: Principal) -> Result<User> {
        self.find_active(principal.id).await
    }

    pub async fn get_user(&self, id: Uuid) -> Result<PublicProfile> {
        self.find_active(id).await.map(PublicProfile::from)
    }

    pub async fn search_users(&self, query: &str) -> Result<Vec<PublicProfile>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .users
            .search_users(query, USER_SEARCH_LIMIT)
            .await?
            .into_iter()
            .map(PublicProfile::from)
            .collect())
    }

    pub async fn list_users(&self, principal: Principal) -> Result<Vec<User>> {
        principal.ensure_admin()?;
        self.users.list_active_users().await
    }

    /// Self or admin. A new avatar replaces the stored one, whose file is
    /// unlinked afterwards.
    pub async fn update_profile(
        &self,
        principal: Principal,
        user_id: Uuid,
        bio: Option<String>,
        avatar: Option<FileUpload>,
    ) -> Result<User> {
        principal.ensure_can_modify(user_id, "profile")?;
        let bio = bio
            .map(|b| validation::bounded_text("bio", b.trim(), MAX_BIO_LEN))
            .transpose()?;
        if let Some(upload) = &avatar {
            if validation::media_type(&upload.content_type)? != MediaType::Image {
                return Err(DomainError::validation("avatar must be an image"));
            }
        }
        let existing = self.find_active(user_id).await?;

        let stored = match avatar {
            Some(upload) => Some(self.storage.store(upload).await?),
            None => None,
        };
        let update = ProfileUpdate {
            bio,
            avatar: stored.as_ref().map(|s| s.path.clone()),
        };
        let user = match self.users.update_profile(user_id, update).await {
            Ok(user) => user,
            Err(err) => {
                if let Some(stored) = &stored {
                    self.unlink(&stored.path).await;
                }
                return Err(err);
            }
        };
        info!(user_id = %user_id, "profile updated");

        if stored.is_some() {
            if let Some(old) = existing.avatar.as_deref() {
                self.unlink(old).await;
            }
        }
        Ok(user)
    }

    /// Admin only. Accounts are deactivated, never removed.
    pub async fn delete_user(&self, principal: Principal, user_id: Uuid) -> Result<()> {
        principal.ensure_admin()?;
        self.find_active(user_id).await?;
        self.users.deactivate_user(user_id).await?;
        info!(user_id = %user_id, "user deactivated");
        Ok(())
    }

    async fn find_active(&self, id: Uuid) -> Result<User> {
        self.users
            .find_user(id)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| DomainError::not_found("user", id))
    }

    async fn unlink(&self, path: &str) {
        if let Err(err) = self.storage.remove(path).await {
            warn!(path, error = %err, "failed to unlink avatar");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use domains::{
        MockMediaStorage, MockPasswordHasher, MockTokenService, MockUserRepository, StoredFile,
    };

    fn service(
        users: MockUserRepository,
        hasher: MockPasswordHasher,
        tokens: MockTokenService,
        storage: MockMediaStorage,
    ) -> UserService {
        UserService::new(Arc::new(users), Arc::new(hasher), Arc::new(tokens), Arc::new(storage))
    }

    #[tokio::test]
    async fn register_rejects_taken_email() {
        let mut users = MockUserRepository::new();
        users
            .expect_find_user_by_email()
            .returning(|e| Ok(Some(User::new("someone".into(), e.to_string(), String::new()))));
        users.expect_create_user().never();

        let svc = service(
            users,
            MockPasswordHasher::new(),
            MockTokenService::new(),
            MockMediaStorage::new(),
        );
        let err = svc.register("bob", "Bob@x.io", "secret1").await.unwrap_err();
        assert_eq!(err, DomainError::conflict("user already exists"));
    }

    #[tokio::test]
    async fn register_hashes_and_issues_a_token() {
        let mut users = MockUserRepository::new();
        users.expect_find_user_by_email().returning(|_| Ok(None));
        users.expect_find_user_by_username().returning(|_| Ok(None));
        users
            .expect_create_user()
            .withf(|u| u.email == "bob@x.io" && u.password_hash == "hashed")
            .returning(|u| Ok(u));
        let mut hasher = MockPasswordHasher::new();
        hasher
            .expect_hash_password()
            .returning(|_| Ok("hashed".to_string()));
        let mut tokens = MockTokenService::new();
        tokens.expect_issue().returning(|id| Ok(format!("token-{id}")));

        let svc = service(users, hasher, tokens, MockMediaStorage::new());
        let session = svc.register("bob", "Bob@x.io", "secret1").await.unwrap();
        assert_eq!(session.token, format!("token-{}", session.user.id));
        assert!(!session.user.is_admin);
    }

    #[tokio::test]
    async fn deactivated_accounts_cannot_log_in() {
        let mut user = User::new("bob".into(), "bob@x.io".into(), "hashed".into());
        user.is_active = false;
        let mut users = MockUserRepository::new();
        users
            .expect_find_user_by_email()
            .returning(move |_| Ok(Some(user.clone())));
        let mut hasher = MockPasswordHasher::new();
        hasher.expect_verify_password().never();

        let svc = service(users, hasher, MockTokenService::new(), MockMediaStorage::new());
        let err = svc.login("bob@x.io", "secret1").await.unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn new_avatar_replaces_and_unlinks_the_old_one() {
        let mut user = User::new("bob".into(), "bob@x.io".into(), String::new());
        user.avatar = Some("/uploads/old.png".into());
        let id = user.id;
        let mut users = MockUserRepository::new();
        let current = user.clone();
        users
            .expect_find_user()
            .returning(move |_| Ok(Some(current.clone())));
        users.expect_update_profile().returning(move |_, update| {
            let mut updated = user.clone();
            updated.avatar = update.avatar;
            Ok(updated)
        });
        let mut storage = MockMediaStorage::new();
        storage.expect_store().returning(|_| {
            Ok(StoredFile {
                filename: "new.png".into(),
                path: "/uploads/new.png".into(),
                size: 3,
            })
        });
        storage
            .expect_remove()
            .withf(|p| p == "/uploads/old.png")
            .times(1)
            .returning(|_| Ok(()));

        let svc = service(users, MockPasswordHasher::new(), MockTokenService::new(), storage);
        let updated = svc
            .update_profile(
                Principal { id, is_admin: false },
                id,
                None,
                Some(FileUpload {
                    filename: "me.png".into(),
                    content_type: mime::IMAGE_PNG,
                    bytes: Bytes::from_static(b"png"),
                }),
            )
            .await
            .unwrap();
        assert_eq!(updated.avatar.as_deref(), Some("/uploads/new.png"));
    }

    #[tokio::test]
    async fn only_self_or_admin_edits_a_profile() {
        let svc = service(
            MockUserRepository::new(),
            MockPasswordHasher::new(),
            MockTokenService::new(),
            MockMediaStorage::new(),
        );
        let err = svc
            .update_profile(
                Principal { id: Uuid::new_v4(), is_admin: false },
                Uuid::new_v4(),
                Some("hi".into()),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));
    }
}
