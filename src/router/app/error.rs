use axum::{
    extract::{Extension, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;

use std::sync::Arc;

use crate::{
    chat::session::ChatError,
    data::storage::StorageError,
    gate,
    middleware::{render_error_page, Session},
    AppState,
};

/// Failures a handler cannot turn into a page of its own.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("template: {0}")]
    Template(#[from] tera::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Chat(ChatError::NotFound(id)) => {
                tracing::debug!("no chat {}", id);
                StatusCode::NOT_FOUND.into_response()
            }
            other => {
                tracing::error!("{}", other);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

#[derive(Deserialize)]
pub struct ErrorParams {
    code: u16,
    message: String,
}

#[axum::debug_handler]
pub async fn error(
    Query(params): Query<ErrorParams>,
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Result<Html<String>, AppError> {
    let current_user = gate::current_token(&*session.storage, Utc::now()).await?;
    let rendered = render_error_page(
        &state,
        current_user.as_ref(),
        params.code,
        &params.message,
    )?;
    Ok(Html(rendered))
}
