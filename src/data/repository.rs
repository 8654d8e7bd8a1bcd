use std::sync::Arc;

use super::{
    model::{ChatHistories, ChatId},
    storage::{Storage, StorageError},
};

pub const CHAT_HISTORIES_KEY: &str = "chatHistories";
pub const ACTIVE_CHAT_KEY: &str = "activeChatId";
pub const DRAFT_KEY: &str = "chat_draft";

/// Chat histories and active chat id on top of a session's storage.
#[derive(Clone)]
pub struct ChatRepository {
    pub storage: Arc<dyn Storage>,
}

impl ChatRepository {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Missing and unreadable histories both come back empty.
    pub async fn load(&self) -> Result<ChatHistories, StorageError> {
        let Some(raw) = self.storage.get_item(CHAT_HISTORIES_KEY).await? else {
            return Ok(ChatHistories::new());
        };

        match serde_json::from_str(&raw) {
            Ok(histories) => Ok(histories),
            Err(e) => {
                tracing::warn!("discarding unreadable chat histories: {}", e);
                Ok(ChatHistories::new())
            }
        }
    }

    pub async fn save(&self, histories: &ChatHistories) -> Result<(), StorageError> {
        // serializing a map of strings and plain structs cannot fail
        let raw = serde_json::to_string(histories).unwrap_or_else(|_| "{}".to_string());
        self.storage.set_item(CHAT_HISTORIES_KEY, &raw).await
    }

    pub async fn active_id(&self) -> Result<Option<ChatId>, StorageError> {
        Ok(self
            .storage
            .get_item(ACTIVE_CHAT_KEY)
            .await?
            .filter(|id| !id.is_empty())
            .map(ChatId::parse))
    }

    pub async fn set_active_id(&self, id: Option<&ChatId>) -> Result<(), StorageError> {
        match id {
            Some(id) => self.storage.set_item(ACTIVE_CHAT_KEY, id.as_str()).await,
            None => self.storage.remove_item(ACTIVE_CHAT_KEY).await,
        }
    }

    pub async fn draft(&self) -> Result<String, StorageError> {
        Ok(self.storage.get_item(DRAFT_KEY).await?.unwrap_or_default())
    }

    pub async fn set_draft(&self, draft: &str) -> Result<(), StorageError> {
        if draft.is_empty() {
            self.storage.remove_item(DRAFT_KEY).await
        } else {
            self.storage.set_item(DRAFT_KEY, draft).await
        }
    }
}
