use axum::{
    extract::{Extension, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    Form,
};
use chrono::Utc;
use serde::Deserialize;
use tera::Context;
use tokio::sync::Mutex;

use std::sync::Arc;

use super::error::AppError;
use crate::{
    chat::{
        session::ChatSession,
        submit::{self, SubmitError, SubmitOutcome},
    },
    data::model::ChatId,
    gate::AuthToken,
    middleware::{redirect, Session},
    render::{
        message::{render_message, render_messages, RenderedMessage},
        sidebar::group_chats,
    },
    AppState,
};

async fn chat_session(
    state: &AppState,
    session: &Session,
) -> Result<Arc<Mutex<ChatSession>>, AppError> {
    Ok(state
        .sessions
        .get_or_restore(&session.id, session.storage.clone())
        .await?)
}

fn render_chat_list(
    state: &AppState,
    chats: &ChatSession,
    query: Option<&str>,
) -> Result<String, AppError> {
    let mut context = Context::new();
    context.insert(
        "groups",
        &group_chats(
            chats.histories(),
            chats.active_id(),
            query,
            state.calendar_offset,
        ),
    );
    context.insert("query", &query.unwrap_or_default());
    Ok(state.tera.render("components/chat_list.html", &context)?)
}

async fn render_chat_page(
    state: &AppState,
    chats: &ChatSession,
    token: &AuthToken,
) -> Result<Html<String>, AppError> {
    let active = chats.active_chat();
    let mut messages = active
        .map(|chat| render_messages(&chat.messages))
        .unwrap_or_default();
    let thinking = chats.active_id().map_or(false, |id| chats.is_thinking(id));
    if thinking {
        messages.push(RenderedMessage::thinking());
    }

    let mut context = Context::new();
    context.insert("chat_list", &render_chat_list(state, chats, None)?);
    context.insert("active_id", &chats.active_id().map(ChatId::as_str));
    context.insert("active_name", &active.map(|chat| chat.name.as_str()));
    context.insert("messages", &messages);
    context.insert("can_send", &chats.can_send());
    context.insert("draft", &chats.repo().draft().await?);
    let view = state.tera.render("views/chat.html", &context)?;

    let mut context = Context::new();
    context.insert("view", &view);
    context.insert("signed_in", &true);
    context.insert("current_user", &token.username);
    context.insert("is_admin", &token.is_admin());
    let rendered = state.tera.render("views/main.html", &context)?;

    Ok(Html(rendered))
}

#[axum::debug_handler]
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Extension(token): Extension<AuthToken>,
) -> Result<Html<String>, AppError> {
    let chats = chat_session(&state, &session).await?;
    let chats = chats.lock().await;
    render_chat_page(&state, &chats, &token).await
}

#[axum::debug_handler]
pub async fn chat_by_id(
    Path(chat_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Extension(token): Extension<AuthToken>,
) -> Result<Html<String>, AppError> {
    let chats = chat_session(&state, &session).await?;
    let mut chats = chats.lock().await;
    chats.switch_chat(&ChatId::parse(chat_id)).await?;
    render_chat_page(&state, &chats, &token).await
}

#[axum::debug_handler]
pub async fn new_chat(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let chats = chat_session(&state, &session).await?;
    let id = chats.lock().await.new_chat(Utc::now()).await?;
    Ok(redirect(&headers, &format!("/chat/{}", id)))
}

#[derive(Deserialize, Debug)]
pub struct ListQuery {
    q: Option<String>,
}

#[axum::debug_handler]
pub async fn chat_list(
    Query(query): Query<ListQuery>,
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Result<Html<String>, AppError> {
    let chats = chat_session(&state, &session).await?;
    let chats = chats.lock().await;
    Ok(Html(render_chat_list(&state, &chats, query.q.as_deref())?))
}

/// The new name comes from htmx's `HX-Prompt` header. The search box rides along as `q`.
#[axum::debug_handler]
pub async fn rename_chat(
    Path(chat_id): Path<String>,
    Query(query): Query<ListQuery>,
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    headers: HeaderMap,
) -> Result<Html<String>, AppError> {
    let name = headers
        .get("HX-Prompt")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let chats = chat_session(&state, &session).await?;
    let mut chats = chats.lock().await;
    chats.rename_chat(&ChatId::parse(chat_id), name).await?;
    Ok(Html(render_chat_list(&state, &chats, query.q.as_deref())?))
}

#[axum::debug_handler]
pub async fn toggle_pin(
    Path(chat_id): Path<String>,
    Query(query): Query<ListQuery>,
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Result<Html<String>, AppError> {
    let chats = chat_session(&state, &session).await?;
    let mut chats = chats.lock().await;
    chats.toggle_pin(&ChatId::parse(chat_id)).await?;
    Ok(Html(render_chat_list(&state, &chats, query.q.as_deref())?))
}

#[axum::debug_handler]
pub async fn delete_chat(
    Path(chat_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let chats = chat_session(&state, &session).await?;
    let mut chats = chats.lock().await;
    chats.delete_chat(&ChatId::parse(chat_id)).await?;

    let to = match chats.active_id() {
        Some(id) => format!("/chat/{}", id),
        None => "/chat".to_string(),
    };
    Ok(redirect(&headers, &to))
}

#[derive(Deserialize, Debug)]
pub struct SendMessage {
    #[serde(default)]
    message: String,
}

/// Returns the user message and the reply (or the error notice) as message fragments.
#[axum::debug_handler]
pub async fn chat_add_message(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Extension(token): Extension<AuthToken>,
    Form(send): Form<SendMessage>,
) -> Result<Response, AppError> {
    let chats = chat_session(&state, &session).await?;

    let result = submit::submit_message(
        chats,
        state.completion.clone(),
        token.token.clone(),
        &send.message,
        &state.system_prompt,
    )
    .await;

    let (user_message, outcome) = match result {
        Ok(done) => done,
        Err(SubmitError::Empty | SubmitError::NoActiveChat | SubmitError::Busy) => {
            return Ok(StatusCode::NO_CONTENT.into_response());
        }
        Err(SubmitError::Chat(e)) => return Err(e.into()),
    };

    let mut messages = vec![render_message(&user_message)];
    match outcome {
        SubmitOutcome::Replied { reply, .. } => messages.push(render_message(&reply)),
        SubmitOutcome::Failed { .. } => messages.push(RenderedMessage::error()),
        SubmitOutcome::Discarded => {}
    }

    let mut context = Context::new();
    context.insert("messages", &messages);
    let update = state.tera.render("components/messages.html", &context)?;

    Ok(Html(update).into_response())
}

#[derive(Deserialize, Debug)]
pub struct Draft {
    #[serde(default)]
    message: String,
}

#[axum::debug_handler]
pub async fn save_draft(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Form(draft): Form<Draft>,
) -> Result<StatusCode, AppError> {
    let chats = chat_session(&state, &session).await?;
    let chats = chats.lock().await;
    chats.repo().set_draft(&draft.message).await?;
    Ok(StatusCode::NO_CONTENT)
}
