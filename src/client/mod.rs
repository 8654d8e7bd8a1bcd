//! Calls to the remote API: chat completions, password exchange and account admin.

use reqwest::{Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;

pub mod auth;
pub mod completion;
pub mod users;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server answered {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("invalid url: {0}")]
    Url(String),
}

impl ApiError {
    /// Message suitable for an inline form error.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            ApiError::Status { message, .. } if !message.is_empty() => message.clone(),
            _ => fallback.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Passes successful responses through; otherwise reads the `{error}` body if there is one.
pub(crate) async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|body| body.error)
        .unwrap_or_default();
    Err(ApiError::Status { status, message })
}

#[cfg(test)]
pub(crate) mod testing {
    use std::net::{SocketAddr, TcpListener};

    use axum::Router;

    /// Serves `app` on an ephemeral local port and returns its base url.
    pub fn spawn_remote(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let server = axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service());
        tokio::spawn(server);
        format!("http://{}/api", addr)
    }
}
