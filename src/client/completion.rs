use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{check_status, ApiError};
use crate::data::model::Message;

/// Stored as the reply when the API answers without any choice content.
pub const NO_REPLY: &str = "Sorry, I could not process your request.";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub messages: Vec<WireMessage>,
}

impl ChatRequest {
    /// System prompt followed by the whole transcript, oldest first.
    pub fn new(system_prompt: &str, transcript: &[Message]) -> Self {
        let system = WireMessage {
            role: "system".to_string(),
            content: system_prompt.to_string(),
        };
        let messages = std::iter::once(system)
            .chain(transcript.iter().map(|m| WireMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            }))
            .collect();
        Self { messages }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ChatResponse {
    fn reply(self) -> String {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .filter(|content| !content.is_empty())
            .unwrap_or_else(|| NO_REPLY.to_string())
    }
}

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, token: &str, request: &ChatRequest) -> Result<String, ApiError>;
}

pub struct CompletionClient {
    client: Client,
    url: String,
    retries: u32,
    retry_delay: Duration,
}

impl CompletionClient {
    pub fn new(client: Client, api_base_url: &str, retries: u32, retry_delay: Duration) -> Self {
        Self {
            client,
            url: format!("{}/chat", api_base_url),
            retries,
            retry_delay,
        }
    }
}

#[async_trait]
impl CompletionBackend for CompletionClient {
    async fn complete(&self, token: &str, request: &ChatRequest) -> Result<String, ApiError> {
        let mut attempt = 0;
        loop {
            let response = self
                .client
                .post(&self.url)
                .bearer_auth(token)
                .json(request)
                .send()
                .await?;

            if response.status().is_server_error() && attempt < self.retries {
                attempt += 1;
                tracing::warn!(
                    "completion request got {}, retry {}/{}",
                    response.status(),
                    attempt,
                    self.retries
                );
                tokio::time::sleep(self.retry_delay).await;
                continue;
            }

            let response = check_status(response).await?;
            let body: ChatResponse = response.json().await?;
            return Ok(body.reply());
        }
    }
}
