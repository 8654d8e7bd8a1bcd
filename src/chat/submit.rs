use thiserror::Error;
use tokio::sync::Mutex;

use std::sync::Arc;

use super::session::{ChatError, ChatSession, Pending};
use crate::{
    client::completion::{ChatRequest, CompletionBackend},
    data::model::{ChatId, Message},
};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("message is empty")]
    Empty,
    #[error("no active chat")]
    NoActiveChat,
    #[error("a reply is still pending")]
    Busy,
    #[error(transparent)]
    Chat(#[from] ChatError),
}

/// Handed out by [`ChatSession::begin_submit`]; redeemed by [`ChatSession::finish_submit`].
#[derive(Debug)]
pub struct Ticket {
    pub generation: u64,
    pub chat_id: ChatId,
    pub user_message: Message,
    pub request: ChatRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The reply was stored in the chat.
    Replied { chat_id: ChatId, reply: Message },
    /// The call failed; nothing was stored.
    Failed { chat_id: ChatId },
    /// The chat went away or a newer request took over while waiting.
    Discarded,
}

impl ChatSession {
    /// Validates the input, stores it and marks a request as pending.
    pub async fn begin_submit(
        &mut self,
        input: &str,
        system_prompt: &str,
    ) -> Result<Ticket, SubmitError> {
        let text = input.trim();
        if text.is_empty() {
            return Err(SubmitError::Empty);
        }
        let chat_id = self.active_id().cloned().ok_or(SubmitError::NoActiveChat)?;
        if self.pending.is_some() {
            return Err(SubmitError::Busy);
        }

        let user_message = Message::user(text);
        self.append_message(&chat_id, user_message.clone()).await?;
        self.repo().set_draft("").await.map_err(ChatError::from)?;

        let transcript = self
            .histories()
            .get(&chat_id)
            .map(|chat| chat.messages.as_slice())
            .unwrap_or_default();
        let request = ChatRequest::new(system_prompt, transcript);

        self.generation += 1;
        self.pending = Some(Pending {
            generation: self.generation,
            chat_id: chat_id.clone(),
            orphaned: false,
        });

        Ok(Ticket {
            generation: self.generation,
            chat_id,
            user_message,
            request,
        })
    }

    /// Applies the result of a ticket's request if it is still the pending one.
    pub async fn finish_submit<E: std::fmt::Display>(
        &mut self,
        ticket: &Ticket,
        result: Result<String, E>,
    ) -> Result<SubmitOutcome, SubmitError> {
        let current = self
            .pending
            .as_ref()
            .map_or(false, |p| p.generation == ticket.generation);
        if !current {
            tracing::debug!("dropping stale reply for generation {}", ticket.generation);
            return Ok(SubmitOutcome::Discarded);
        }
        let orphaned = self.pending.take().map_or(false, |p| p.orphaned);
        if orphaned {
            tracing::debug!("dropping reply for deleted {}", ticket.chat_id);
            return Ok(SubmitOutcome::Discarded);
        }

        match result {
            Ok(text) => {
                let reply = Message::assistant(text);
                match self.append_message(&ticket.chat_id, reply.clone()).await {
                    Ok(()) => Ok(SubmitOutcome::Replied {
                        chat_id: ticket.chat_id.clone(),
                        reply,
                    }),
                    Err(ChatError::NotFound(_)) => Ok(SubmitOutcome::Discarded),
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => {
                tracing::error!("completion for {} failed: {}", ticket.chat_id, e);
                Ok(SubmitOutcome::Failed {
                    chat_id: ticket.chat_id.clone(),
                })
            }
        }
    }

    /// Clears the pending request of a generation whose task never reported back.
    pub fn abandon_submit(&mut self, generation: u64) {
        if self.pending.as_ref().map_or(false, |p| p.generation == generation) {
            self.pending = None;
        }
    }
}

/// Runs one submit end to end. The session lock is released while the API call is out.
///
/// The call and its bookkeeping run on their own task, so a dropped caller (a client
/// that disconnects mid-request) still leaves the session ready for the next submit.
pub async fn submit_message(
    session: Arc<Mutex<ChatSession>>,
    backend: Arc<dyn CompletionBackend>,
    token: String,
    input: &str,
    system_prompt: &str,
) -> Result<(Message, SubmitOutcome), SubmitError> {
    let ticket = session.lock().await.begin_submit(input, system_prompt).await?;
    let user_message = ticket.user_message.clone();
    let generation = ticket.generation;
    let chat_id = ticket.chat_id.clone();

    let task = {
        let session = session.clone();
        tokio::spawn(async move {
            let result = backend.complete(&token, &ticket.request).await;
            session.lock().await.finish_submit(&ticket, result).await
        })
    };

    match task.await {
        Ok(outcome) => Ok((user_message, outcome?)),
        Err(e) => {
            tracing::error!("completion task for {} died: {}", chat_id, e);
            session.lock().await.abandon_submit(generation);
            Ok((user_message, SubmitOutcome::Failed { chat_id }))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use reqwest::StatusCode;
    use tokio::sync::Notify;

    use super::*;
    use crate::{
        client::{completion::ChatRequest, ApiError},
        data::{repository::ChatRepository, storage::MemoryStorage},
    };

    const PROMPT: &str = "You are a helpful assistant.";

    /// Answers with the number of messages it was sent, optionally after a release.
    #[derive(Default)]
    struct FakeCompletion {
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
        fail: bool,
        panic: bool,
    }

    impl FakeCompletion {
        fn gated(gate: &Arc<Notify>) -> Arc<Self> {
            Arc::new(Self {
                gate: Some(gate.clone()),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl CompletionBackend for FakeCompletion {
        async fn complete(&self, _token: &str, request: &ChatRequest) -> Result<String, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.panic {
                panic!("backend blew up");
            }
            if self.fail {
                return Err(ApiError::Status {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: String::new(),
                });
            }
            Ok(format!("seen {}", request.messages.len()))
        }
    }

    async fn session_with_chat() -> (Arc<MemoryStorage>, Arc<Mutex<ChatSession>>) {
        let storage = Arc::new(MemoryStorage::new());
        let mut session = ChatSession::restore(ChatRepository::new(storage.clone()))
            .await
            .unwrap();
        session.new_chat(Utc::now()).await.unwrap();
        (storage, Arc::new(Mutex::new(session)))
    }

    async fn submit(
        session: &Arc<Mutex<ChatSession>>,
        backend: &Arc<FakeCompletion>,
        input: &str,
    ) -> Result<(Message, SubmitOutcome), SubmitError> {
        submit_message(
            session.clone(),
            backend.clone(),
            "t".to_string(),
            input,
            PROMPT,
        )
        .await
    }

    async fn wait_for_calls(backend: &FakeCompletion, n: usize) {
        while backend.calls.load(Ordering::SeqCst) < n {
            tokio::task::yield_now().await;
        }
    }

    fn message_count(session: &ChatSession) -> usize {
        session.active_chat().map_or(0, |c| c.messages.len())
    }

    fn contents(session: &ChatSession) -> Vec<String> {
        session
            .active_chat()
            .map(|c| c.messages.iter().map(|m| m.content.clone()).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_reply_is_appended() {
        let (_storage, session) = session_with_chat().await;
        let backend = Arc::new(FakeCompletion::default());

        let (user, outcome) = submit(&session, &backend, "  hello  ").await.unwrap();

        assert_eq!(user, Message::user("hello"));
        match outcome {
            // system prompt + the user message
            SubmitOutcome::Replied { reply, .. } => assert_eq!(reply, Message::assistant("seen 2")),
            other => panic!("unexpected outcome {:?}", other),
        }
        let session = session.lock().await;
        assert_eq!(message_count(&session), 2);
        assert!(session.pending().is_none());
    }

    #[tokio::test]
    async fn test_blank_input_does_nothing() {
        let (_storage, session) = session_with_chat().await;
        let backend = Arc::new(FakeCompletion::default());

        let err = submit(&session, &backend, " \n\t ").await.unwrap_err();

        assert!(matches!(err, SubmitError::Empty));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert_eq!(message_count(&*session.lock().await), 0);
    }

    #[tokio::test]
    async fn test_no_active_chat_is_rejected() {
        let storage = Arc::new(MemoryStorage::new());
        let session = ChatSession::restore(ChatRepository::new(storage))
            .await
            .unwrap();
        let session = Arc::new(Mutex::new(session));
        let backend = Arc::new(FakeCompletion::default());

        let err = submit(&session, &backend, "hi").await.unwrap_err();
        assert!(matches!(err, SubmitError::NoActiveChat));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_submit_while_pending_is_ignored() {
        let (_storage, session) = session_with_chat().await;
        let gate = Arc::new(Notify::new());
        let backend = FakeCompletion::gated(&gate);

        let first = {
            let session = session.clone();
            let backend = backend.clone();
            tokio::spawn(async move { submit(&session, &backend, "first").await })
        };

        wait_for_calls(&backend, 1).await;
        {
            let session = session.lock().await;
            assert!(!session.can_send());
            assert!(session.is_thinking(session.active_id().unwrap()));
        }

        let err = submit(&session, &backend, "second").await.unwrap_err();
        assert!(matches!(err, SubmitError::Busy));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        gate.notify_one();
        let (_, outcome) = first.await.unwrap().unwrap();
        assert!(matches!(outcome, SubmitOutcome::Replied { .. }));

        let session = session.lock().await;
        assert_eq!(contents(&session), vec!["first", "seen 2"]);
        assert!(session.can_send());
    }

    #[tokio::test]
    async fn test_dropped_caller_still_finishes() {
        let (storage, session) = session_with_chat().await;
        let gate = Arc::new(Notify::new());
        let backend = FakeCompletion::gated(&gate);

        let caller = {
            let session = session.clone();
            let backend = backend.clone();
            tokio::spawn(async move { submit(&session, &backend, "one").await })
        };
        wait_for_calls(&backend, 1).await;

        // the client went away mid-request
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());
        assert!(session.lock().await.pending().is_some());

        gate.notify_one();
        while session.lock().await.pending().is_some() {
            tokio::task::yield_now().await;
        }

        let (_, outcome) = submit(&session, &Arc::new(FakeCompletion::default()), "two")
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Replied { .. }));
        assert_eq!(
            contents(&*session.lock().await),
            vec!["one", "seen 2", "two", "seen 4"]
        );

        let reloaded = ChatRepository::new(storage).load().await.unwrap();
        let (_, chat) = reloaded.iter().next().unwrap();
        assert_eq!(chat.messages.len(), 4);
    }

    #[tokio::test]
    async fn test_panicking_backend_releases_session() {
        let (_storage, session) = session_with_chat().await;
        let backend = Arc::new(FakeCompletion {
            panic: true,
            ..Default::default()
        });

        let (_, outcome) = submit(&session, &backend, "hi").await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Failed { .. }));

        let session = session.lock().await;
        assert!(session.pending().is_none());
        assert!(session.can_send());
        assert_eq!(contents(&session), vec!["hi"]);
    }

    #[tokio::test]
    async fn test_failure_stores_nothing() {
        let (storage, session) = session_with_chat().await;
        let backend = Arc::new(FakeCompletion {
            fail: true,
            ..Default::default()
        });

        let (_, outcome) = submit(&session, &backend, "hi").await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Failed { .. }));

        let reloaded = ChatRepository::new(storage).load().await.unwrap();
        let (_, chat) = reloaded.iter().next().unwrap();
        assert_eq!(chat.messages, vec![Message::user("hi")]);
        assert!(session.lock().await.can_send());
    }

    #[tokio::test]
    async fn test_reply_for_deleted_chat_is_discarded() {
        let (_storage, session) = session_with_chat().await;
        let mut session = session.lock().await;

        let ticket = session.begin_submit("one", PROMPT).await.unwrap();
        session.delete_chat(&ticket.chat_id).await.unwrap();
        session.new_chat(Utc::now()).await.unwrap();

        // the first request is still out, so no second one may start
        assert!(!session.can_send());
        assert!(matches!(
            session.begin_submit("two", PROMPT).await,
            Err(SubmitError::Busy)
        ));

        let outcome = session
            .finish_submit(&ticket, Ok::<_, ApiError>("late".to_string()))
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Discarded);
        assert!(session.pending().is_none());
        assert!(contents(&session).is_empty());

        let next = session.begin_submit("two", PROMPT).await.unwrap();
        assert!(next.generation > ticket.generation);
    }

    #[tokio::test]
    async fn test_stale_generation_is_discarded() {
        let (_storage, session) = session_with_chat().await;
        let mut session = session.lock().await;

        let old = session.begin_submit("one", PROMPT).await.unwrap();
        session
            .finish_submit(&old, Ok::<_, ApiError>("reply".to_string()))
            .await
            .unwrap();
        let new = session.begin_submit("two", PROMPT).await.unwrap();
        assert!(new.generation > old.generation);

        // the old ticket cannot complete the new request
        let outcome = session
            .finish_submit(&old, Ok::<_, ApiError>("again".to_string()))
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Discarded);
        assert!(session.pending().is_some());

        session.abandon_submit(old.generation);
        assert!(session.pending().is_some());
        session.abandon_submit(new.generation);
        assert!(session.pending().is_none());
    }

    #[tokio::test]
    async fn test_submit_clears_draft() {
        let (storage, session) = session_with_chat().await;
        let repo = ChatRepository::new(storage);
        repo.set_draft("half typed").await.unwrap();

        submit(&session, &Arc::new(FakeCompletion::default()), "hi")
            .await
            .unwrap();
        assert_eq!(repo.draft().await.unwrap(), "");
    }
}
