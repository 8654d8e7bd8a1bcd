use async_trait::async_trait;
use reqwest::Client;
use serde::{de, Deserialize, Deserializer, Serialize};

use super::{check_status, ApiError};

#[derive(Serialize, Debug)]
struct AuthRequest<'a> {
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
}

/// What the API hands back for a good password.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AuthGrant {
    pub token: String,
    /// Unix time in milliseconds.
    #[serde(deserialize_with = "millis")]
    pub expiration: i64,
    #[serde(default)]
    pub role: Option<String>,
}

// Some deployments send the expiry as a numeric string.
fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn authenticate(
        &self,
        username: Option<&str>,
        password: &str,
    ) -> Result<AuthGrant, ApiError>;
}

pub struct AuthClient {
    client: Client,
    url: String,
}

impl AuthClient {
    pub fn new(client: Client, api_base_url: &str) -> Self {
        Self {
            client,
            url: format!("{}/auth", api_base_url),
        }
    }
}

#[async_trait]
impl AuthBackend for AuthClient {
    async fn authenticate(
        &self,
        username: Option<&str>,
        password: &str,
    ) -> Result<AuthGrant, ApiError> {
        let response = self
            .client
            .post(&self.url)
            .json(&AuthRequest { password, username })
            .send()
            .await?;
        let grant = check_status(response).await?.json().await?;
        Ok(grant)
    }
}
