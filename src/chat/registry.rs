use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::Mutex;

use super::session::{ChatError, ChatSession};
use crate::data::{repository::ChatRepository, storage::Storage};

struct Entry {
    session: Arc<Mutex<ChatSession>>,
    last_used: Instant,
}

impl Entry {
    /// Only the registry holds it and no reply is on the way. Dropping a session that a
    /// request or a completion task still holds would let a restored copy race its writes.
    fn is_idle(&self) -> bool {
        Arc::strong_count(&self.session) == 1
            && self
                .session
                .try_lock()
                .map_or(false, |session| session.pending().is_none())
    }
}

/// Live chat sessions by session id, restored from storage on first use.
///
/// Entries unused for longer than the idle ttl are dropped on the next lookup. Their
/// chats stay in storage and come back on the session's next request.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Entry>>,
    idle_ttl: Duration,
}

impl SessionRegistry {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_ttl,
        }
    }

    pub async fn get_or_restore(
        &self,
        session_id: &str,
        storage: Arc<dyn Storage>,
    ) -> Result<Arc<Mutex<ChatSession>>, ChatError> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        Self::prune(&mut sessions, now, self.idle_ttl);

        if let Some(entry) = sessions.get_mut(session_id) {
            entry.last_used = now;
            return Ok(entry.session.clone());
        }

        let session = ChatSession::restore(ChatRepository::new(storage)).await?;
        let session = Arc::new(Mutex::new(session));
        sessions.insert(
            session_id.to_string(),
            Entry {
                session: session.clone(),
                last_used: now,
            },
        );
        tracing::debug!("restored chat session {}", session_id);
        Ok(session)
    }

    /// Forgets a session, unless it is still in use. Returns whether it was removed.
    pub async fn evict(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        let idle = match sessions.get(session_id) {
            Some(entry) => entry.is_idle(),
            None => return false,
        };
        if !idle {
            tracing::debug!("chat session {} is busy, leaving it for the idle sweep", session_id);
            return false;
        }
        sessions.remove(session_id);
        tracing::debug!("evicted chat session {}", session_id);
        true
    }

    /// Drops idle sessions last used before `now - idle_ttl`.
    pub async fn prune_idle(&self, now: Instant) {
        let mut sessions = self.sessions.lock().await;
        Self::prune(&mut sessions, now, self.idle_ttl);
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    fn prune(sessions: &mut HashMap<String, Entry>, now: Instant, idle_ttl: Duration) {
        let before = sessions.len();
        sessions.retain(|_, entry| {
            now.saturating_duration_since(entry.last_used) <= idle_ttl || !entry.is_idle()
        });
        let dropped = before - sessions.len();
        if dropped > 0 {
            tracing::debug!("dropped {} idle chat sessions", dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::data::storage::MemoryStorage;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_same_session_is_shared() {
        let registry = SessionRegistry::new(TTL);
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());

        let a = registry.get_or_restore("s1", storage.clone()).await.unwrap();
        a.lock().await.new_chat(Utc::now()).await.unwrap();

        let b = registry.get_or_restore("s1", storage.clone()).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.lock().await.histories().len(), 1);

        let other = registry
            .get_or_restore("s2", Arc::new(MemoryStorage::new()))
            .await
            .unwrap();
        assert!(other.lock().await.histories().is_empty());
    }

    #[tokio::test]
    async fn test_evicted_session_is_restored_from_storage() {
        let registry = SessionRegistry::new(TTL);
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());

        let a = registry.get_or_restore("s1", storage.clone()).await.unwrap();
        a.lock().await.new_chat(Utc::now()).await.unwrap();
        drop(a);

        assert!(registry.evict("s1").await);
        assert!(!registry.evict("s1").await);
        assert_eq!(registry.len().await, 0);

        let b = registry.get_or_restore("s1", storage).await.unwrap();
        assert_eq!(b.lock().await.histories().len(), 1);
    }

    #[tokio::test]
    async fn test_busy_session_is_not_evicted() {
        let registry = SessionRegistry::new(TTL);
        let a = registry
            .get_or_restore("s1", Arc::new(MemoryStorage::new()))
            .await
            .unwrap();

        // a request still holds it
        assert!(!registry.evict("s1").await);
        registry.prune_idle(Instant::now() + TTL * 2).await;
        assert_eq!(registry.len().await, 1);

        drop(a);
        assert!(registry.evict("s1").await);
    }

    #[tokio::test]
    async fn test_idle_sessions_are_pruned() {
        let registry = SessionRegistry::new(TTL);
        registry
            .get_or_restore("s1", Arc::new(MemoryStorage::new()))
            .await
            .unwrap();
        registry
            .get_or_restore("s2", Arc::new(MemoryStorage::new()))
            .await
            .unwrap();

        registry.prune_idle(Instant::now() + TTL / 2).await;
        assert_eq!(registry.len().await, 2);

        registry.prune_idle(Instant::now() + TTL * 2).await;
        assert_eq!(registry.len().await, 0);
    }
}
