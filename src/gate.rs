//! Bearer token kept in session storage; nothing else runs until there is a live one.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    client::{
        auth::{AuthBackend, AuthGrant},
        ApiError,
    },
    data::storage::{Storage, StorageError},
};

pub const TOKEN_KEY: &str = "auth_token";
pub const EXPIRATION_KEY: &str = "auth_expiration";
pub const ROLE_KEY: &str = "user_role";
pub const USERNAME_KEY: &str = "username";

pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("a password is required")]
    MissingPassword,
    #[error("login rejected: {0}")]
    Rejected(#[from] ApiError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub token: String,
    /// Unix time in milliseconds.
    pub expires_at: i64,
    pub role: Option<String>,
    pub username: Option<String>,
}

impl AuthToken {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.token.is_empty() && now.timestamp_millis() < self.expires_at
    }

    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some(ADMIN_ROLE)
    }
}

/// The stored token, if there is one and it has not expired.
pub async fn current_token(
    storage: &dyn Storage,
    now: DateTime<Utc>,
) -> Result<Option<AuthToken>, StorageError> {
    let Some(token) = storage.get_item(TOKEN_KEY).await? else {
        return Ok(None);
    };
    let Some(expires_at) = storage
        .get_item(EXPIRATION_KEY)
        .await?
        .and_then(|raw| raw.trim().parse::<i64>().ok())
    else {
        return Ok(None);
    };

    let token = AuthToken {
        token,
        expires_at,
        role: storage.get_item(ROLE_KEY).await?,
        username: storage.get_item(USERNAME_KEY).await?,
    };
    Ok(Some(token).filter(|t| t.is_valid(now)))
}

/// Trades a password for a token and stores it.
pub async fn login(
    storage: &dyn Storage,
    backend: &dyn AuthBackend,
    username: Option<&str>,
    password: &str,
) -> Result<AuthToken, AuthError> {
    let password = password.trim();
    if password.is_empty() {
        return Err(AuthError::MissingPassword);
    }
    let username = username.map(str::trim).filter(|u| !u.is_empty());

    let AuthGrant {
        token,
        expiration,
        role,
    } = backend.authenticate(username, password).await?;

    storage.set_item(TOKEN_KEY, &token).await?;
    storage
        .set_item(EXPIRATION_KEY, &expiration.to_string())
        .await?;
    match &role {
        Some(role) => storage.set_item(ROLE_KEY, role).await?,
        None => storage.remove_item(ROLE_KEY).await?,
    }
    match username {
        Some(username) => storage.set_item(USERNAME_KEY, username).await?,
        None => storage.remove_item(USERNAME_KEY).await?,
    }

    tracing::info!("session authenticated until {}", expiration);
    Ok(AuthToken {
        token,
        expires_at: expiration,
        role,
        username: username.map(str::to_string),
    })
}

/// Forgets the token; chat history stays.
pub async fn logout(storage: &dyn Storage) -> Result<(), StorageError> {
    for key in [TOKEN_KEY, EXPIRATION_KEY, ROLE_KEY, USERNAME_KEY] {
        storage.remove_item(key).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::TimeZone;
    use reqwest::StatusCode;

    use super::*;
    use crate::data::storage::MemoryStorage;

    #[derive(Default)]
    struct FakeAuth {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AuthBackend for FakeAuth {
        async fn authenticate(
            &self,
            username: Option<&str>,
            password: &str,
        ) -> Result<AuthGrant, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if password != "open sesame" {
                return Err(ApiError::Status {
                    status: StatusCode::UNAUTHORIZED,
                    message: "Invalid password".to_string(),
                });
            }
            Ok(AuthGrant {
                token: "tok".to_string(),
                expiration: 2_000,
                role: username.map(|_| "admin".to_string()),
            })
        }
    }

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    #[tokio::test]
    async fn test_no_token_until_login() {
        let storage = MemoryStorage::new();
        assert_eq!(current_token(&storage, at(0)).await.unwrap(), None);

        let backend = FakeAuth::default();
        let token = login(&storage, &backend, None, " open sesame ").await.unwrap();
        assert_eq!(token.expires_at, 2_000);
        assert!(!token.is_admin());

        let stored = current_token(&storage, at(1_999)).await.unwrap().unwrap();
        assert_eq!(stored.token, "tok");
        assert_eq!(storage.get_item(EXPIRATION_KEY).await.unwrap().as_deref(), Some("2000"));
    }

    #[tokio::test]
    async fn test_expired_token_is_ignored() {
        let storage = MemoryStorage::new();
        login(&storage, &FakeAuth::default(), None, "open sesame")
            .await
            .unwrap();
        assert_eq!(current_token(&storage, at(2_000)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_bad_and_empty_passwords() {
        let storage = MemoryStorage::new();
        let backend = FakeAuth::default();

        let err = login(&storage, &backend, None, "   ").await.unwrap_err();
        assert!(matches!(err, AuthError::MissingPassword));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);

        let err = login(&storage, &backend, None, "guess").await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected(_)));
        assert_eq!(storage.get_item(TOKEN_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_admin_role_and_logout() {
        let storage = MemoryStorage::new();
        let token = login(&storage, &FakeAuth::default(), Some("root"), "open sesame")
            .await
            .unwrap();
        assert!(token.is_admin());
        assert_eq!(
            current_token(&storage, at(0)).await.unwrap().unwrap().username.as_deref(),
            Some("root")
        );

        storage.set_item("chatHistories", "{}").await.unwrap();
        logout(&storage).await.unwrap();
        assert_eq!(current_token(&storage, at(0)).await.unwrap(), None);
        assert!(storage.get_item("chatHistories").await.unwrap().is_some());
    }
}
