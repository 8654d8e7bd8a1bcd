use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{check_status, ApiError};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub username: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Account {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

#[derive(Serialize)]
struct NewAccount<'a> {
    username: &'a str,
    password: &'a str,
}

/// Bearer-gated account administration.
#[derive(Clone)]
pub struct UsersClient {
    client: Client,
    url: String,
}

impl UsersClient {
    pub fn new(client: Client, api_base_url: &str) -> Self {
        Self {
            client,
            url: format!("{}/users", api_base_url),
        }
    }

    pub async fn list(&self, token: &str) -> Result<Vec<Account>, ApiError> {
        let response = self.client.get(&self.url).bearer_auth(token).send().await?;
        Ok(check_status(response).await?.json().await?)
    }

    pub async fn create(&self, token: &str, username: &str, password: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(token)
            .json(&NewAccount { username, password })
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    pub async fn delete(&self, token: &str, username: &str) -> Result<(), ApiError> {
        let mut url =
            reqwest::Url::parse(&self.url).map_err(|e| ApiError::Url(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::Url(self.url.clone()))?
            .push(username);

        let response = self.client.delete(url).bearer_auth(token).send().await?;
        check_status(response).await?;
        Ok(())
    }
}
