use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::data::{
    model::{ChatHistories, ChatId, ChatRecord, Message},
    repository::ChatRepository,
    storage::StorageError,
};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("no chat with id {0}")]
    NotFound(ChatId),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A request that has been sent and not yet answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pending {
    pub generation: u64,
    pub chat_id: ChatId,
    /// The chat was deleted while waiting; the reply will be dropped.
    pub orphaned: bool,
}

/// One browser session's chats. Every mutation is written through to storage.
pub struct ChatSession {
    repo: ChatRepository,
    histories: ChatHistories,
    active: Option<ChatId>,
    pub(super) generation: u64,
    pub(super) pending: Option<Pending>,
}

impl ChatSession {
    /// Loads the stored chats and reselects the last active one, else the first.
    pub async fn restore(repo: ChatRepository) -> Result<Self, ChatError> {
        let histories = repo.load().await?;
        let stored_active = repo.active_id().await?;

        let active = stored_active
            .clone()
            .filter(|id| histories.contains(id))
            .or_else(|| histories.first_id().cloned());
        if active != stored_active {
            repo.set_active_id(active.as_ref()).await?;
        }

        Ok(Self {
            repo,
            histories,
            active,
            generation: 0,
            pending: None,
        })
    }

    pub fn repo(&self) -> &ChatRepository {
        &self.repo
    }

    pub fn histories(&self) -> &ChatHistories {
        &self.histories
    }

    pub fn active_id(&self) -> Option<&ChatId> {
        self.active.as_ref()
    }

    pub fn active_chat(&self) -> Option<&ChatRecord> {
        self.active.as_ref().and_then(|id| self.histories.get(id))
    }

    pub fn pending(&self) -> Option<&Pending> {
        self.pending.as_ref()
    }

    /// Whether the send control is usable. Stays false until an orphaned request returns too.
    pub fn can_send(&self) -> bool {
        self.active.is_some() && self.pending.is_none()
    }

    pub fn is_thinking(&self, id: &ChatId) -> bool {
        self.pending
            .as_ref()
            .map_or(false, |p| !p.orphaned && &p.chat_id == id)
    }

    async fn persist(&self) -> Result<(), ChatError> {
        self.repo.save(&self.histories).await?;
        Ok(())
    }

    async fn set_active(&mut self, id: Option<ChatId>) -> Result<(), ChatError> {
        self.repo.set_active_id(id.as_ref()).await?;
        self.active = id;
        Ok(())
    }

    pub async fn new_chat(&mut self, now: DateTime<Utc>) -> Result<ChatId, ChatError> {
        let id = self.histories.next_id(now);
        let name = format!("Chat {}", self.histories.len() + 1);
        self.histories.insert(id.clone(), ChatRecord::new(name));
        self.persist().await?;
        self.set_active(Some(id.clone())).await?;
        tracing::debug!("created {}", id);
        Ok(id)
    }

    pub async fn switch_chat(&mut self, id: &ChatId) -> Result<(), ChatError> {
        if !self.histories.contains(id) {
            return Err(ChatError::NotFound(id.clone()));
        }
        if self.active.as_ref() != Some(id) {
            self.set_active(Some(id.clone())).await?;
        }
        Ok(())
    }

    /// Blank names leave the chat untouched; returns whether it was renamed.
    pub async fn rename_chat(&mut self, id: &ChatId, name: &str) -> Result<bool, ChatError> {
        let name = name.trim();
        let chat = self
            .histories
            .get_mut(id)
            .ok_or_else(|| ChatError::NotFound(id.clone()))?;
        if name.is_empty() {
            return Ok(false);
        }
        chat.name = name.to_string();
        self.persist().await?;
        Ok(true)
    }

    /// Flips the pin flag and returns the new value.
    pub async fn toggle_pin(&mut self, id: &ChatId) -> Result<bool, ChatError> {
        let chat = self
            .histories
            .get_mut(id)
            .ok_or_else(|| ChatError::NotFound(id.clone()))?;
        chat.pinned = !chat.pinned;
        let pinned = chat.pinned;
        self.persist().await?;
        Ok(pinned)
    }

    /// Removes a chat. If it was active, the first remaining chat takes over.
    pub async fn delete_chat(&mut self, id: &ChatId) -> Result<(), ChatError> {
        if self.histories.remove(id).is_none() {
            return Err(ChatError::NotFound(id.clone()));
        }
        self.persist().await?;

        // the request stays outstanding; its reply has nowhere to go
        if let Some(pending) = self.pending.as_mut().filter(|p| &p.chat_id == id) {
            pending.orphaned = true;
        }

        if self.active.as_ref() == Some(id) {
            let next = self.histories.first_id().cloned();
            self.set_active(next).await?;
        }
        tracing::debug!("deleted {}", id);
        Ok(())
    }

    pub async fn append_message(
        &mut self,
        id: &ChatId,
        message: Message,
    ) -> Result<(), ChatError> {
        let chat = self
            .histories
            .get_mut(id)
            .ok_or_else(|| ChatError::NotFound(id.clone()))?;
        chat.messages.push(message);
        self.persist().await
    }
}
