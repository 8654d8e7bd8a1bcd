use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend failed: {0}")]
    Backend(#[from] sqlx::Error),
}

/// String key/value storage scoped to one browser session.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Clone)]
pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
    profile: String,
}

impl SqliteStorage {
    pub fn new(pool: Arc<SqlitePool>, profile: impl Into<String>) -> Self {
        Self {
            pool,
            profile: profile.into(),
        }
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT value FROM local_storage WHERE profile = ? AND key = ?",
        )
        .bind(&self.profile)
        .bind(key)
        .fetch_optional(&*self.pool)
        .await?;
        Ok(value)
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO local_storage (profile, key, value)
            VALUES (?, ?, ?)
            ON CONFLICT (profile, key)
            DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP;
            "#,
        )
        .bind(&self.profile)
        .bind(key)
        .bind(value)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM local_storage WHERE profile = ? AND key = ?")
            .bind(&self.profile)
            .bind(key)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }
}

/// Hands out the storage profile of a browser session.
pub trait Profiles: Send + Sync {
    fn profile(&self, session_id: &str) -> Arc<dyn Storage>;
}

pub struct SqliteProfiles {
    pool: Arc<SqlitePool>,
}

impl SqliteProfiles {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }
}

impl Profiles for SqliteProfiles {
    fn profile(&self, session_id: &str) -> Arc<dyn Storage> {
        Arc::new(SqliteStorage::new(self.pool.clone(), session_id))
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct MemoryStorage {
    items: tokio::sync::Mutex<std::collections::HashMap<String, String>>,
}

#[cfg(test)]
impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
#[async_trait]
impl Storage for MemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.lock().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct MemoryProfiles {
    profiles: std::sync::Mutex<std::collections::HashMap<String, Arc<MemoryStorage>>>,
}

#[cfg(test)]
impl Profiles for MemoryProfiles {
    fn profile(&self, session_id: &str) -> Arc<dyn Storage> {
        let mut profiles = self
            .profiles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        profiles
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use sqlx::{migrate::Migrator, sqlite::SqlitePoolOptions};

    use super::*;

    async fn setup() -> Arc<SqlitePool> {
        // one connection, otherwise every pooled connection gets its own memory db
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        let migrations = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        Migrator::new(migrations).await.unwrap().run(&pool).await.unwrap();

        Arc::new(pool)
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let pool = setup().await;
        let storage = SqliteStorage::new(pool, "session-a");

        assert_eq!(storage.get_item("activeChatId").await.unwrap(), None);

        storage.set_item("activeChatId", "chat-1").await.unwrap();
        storage.set_item("activeChatId", "chat-2").await.unwrap();
        assert_eq!(
            storage.get_item("activeChatId").await.unwrap().as_deref(),
            Some("chat-2")
        );

        storage.remove_item("activeChatId").await.unwrap();
        assert_eq!(storage.get_item("activeChatId").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_profiles_are_isolated() {
        let pool = setup().await;
        let a = SqliteStorage::new(pool.clone(), "session-a");
        let b = SqliteStorage::new(pool, "session-b");

        a.set_item("chat_draft", "hello").await.unwrap();
        assert_eq!(b.get_item("chat_draft").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = MemoryStorage::new();
        storage.set_item("k", "v").await.unwrap();
        assert_eq!(storage.get_item("k").await.unwrap().as_deref(), Some("v"));
        storage.remove_item("k").await.unwrap();
        assert_eq!(storage.get_item("k").await.unwrap(), None);
    }
}
