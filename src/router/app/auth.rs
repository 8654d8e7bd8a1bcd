use axum::{
    extract::{Extension, State},
    http::HeaderMap,
    response::{Html, IntoResponse, Response},
    Form,
};
use chrono::Utc;
use serde::Deserialize;
use tera::Context;

use std::sync::Arc;

use super::error::AppError;
use crate::{
    gate::{self, AuthError, AuthToken},
    middleware::{redirect, Session},
    AppState,
};

const LOGIN_FAILED: &str = "Login failed. Please check your password and try again.";

fn landing(token: &AuthToken) -> &'static str {
    if token.is_admin() {
        "/admin"
    } else {
        "/chat"
    }
}

fn render_login(
    state: &AppState,
    username: &str,
    error: Option<&str>,
) -> Result<Html<String>, AppError> {
    let mut context = Context::new();
    context.insert("username", username);
    context.insert("error", &error);
    let login = state.tera.render("views/login.html", &context)?;

    let mut context = Context::new();
    context.insert("view", &login);
    let rendered = state.tera.render("views/main.html", &context)?;

    Ok(Html(rendered))
}

#[axum::debug_handler]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if let Some(token) = gate::current_token(&*session.storage, Utc::now()).await? {
        return Ok(redirect(&headers, landing(&token)));
    }
    Ok(render_login(&state, "", None)?.into_response())
}

#[derive(Deserialize, Debug)]
pub struct LogIn {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[axum::debug_handler]
pub async fn login_form(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    headers: HeaderMap,
    Form(log_in): Form<LogIn>,
) -> Result<Response, AppError> {
    let result = gate::login(
        &*session.storage,
        &*state.auth,
        Some(log_in.username.as_str()),
        &log_in.password,
    )
    .await;

    let message = match result {
        Ok(token) => return Ok(redirect(&headers, landing(&token))),
        Err(AuthError::MissingPassword) => "Please enter a password.".to_string(),
        Err(AuthError::Rejected(e)) => {
            tracing::warn!("login rejected: {}", e);
            e.user_message(LOGIN_FAILED)
        }
        Err(AuthError::Storage(e)) => return Err(e.into()),
    };

    Ok(render_login(&state, log_in.username.trim(), Some(&message))?.into_response())
}

/// Declining to sign in leaves the app unusable.
#[axum::debug_handler]
pub async fn login_cancel(State(state): State<Arc<AppState>>) -> Result<Html<String>, AppError> {
    let mut context = Context::new();
    context.insert("status_code", &401);
    context.insert(
        "status_text",
        "Authentication required. Sign in to use chatdeck.",
    );
    context.insert("retry_login", &true);
    let view = state.tera.render("views/error.html", &context)?;

    let mut context = Context::new();
    context.insert("view", &view);
    Ok(Html(state.tera.render("views/main.html", &context)?))
}

#[axum::debug_handler]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    gate::logout(&*session.storage).await?;
    state.sessions.evict(&session.id).await;
    tracing::info!("session {} logged out", session.id);
    Ok(redirect(&headers, "/login"))
}
