use axum::{
    routing::{delete, get, post},
    Router,
};

use std::sync::Arc;

use crate::AppState;

mod home;
use home::app;
mod chat;
use chat::{
    chat, chat_add_message, chat_by_id, chat_list, delete_chat, new_chat, rename_chat, save_draft,
    toggle_pin,
};
mod auth;
use auth::{login, login_cancel, login_form, logout};
mod admin;
use admin::{admin, create_user, delete_user};
mod error;
use error::error;

use crate::middleware::{auth, require_admin};

pub fn app_router(state: Arc<AppState>) -> Router {
    let chat_router = Router::new()
        .route("/", get(chat))
        .route("/new", post(new_chat))
        .route("/list", get(chat_list))
        .route("/messages", post(chat_add_message))
        .route("/draft", post(save_draft))
        .route("/:id", get(chat_by_id).delete(delete_chat))
        .route("/:id/rename", post(rename_chat))
        .route("/:id/pin", post(toggle_pin))
        .with_state(state.clone())
        .layer(axum::middleware::from_fn(auth));

    let admin_router = Router::new()
        .route("/", get(admin))
        .route("/users", post(create_user))
        .route("/users/:username", delete(delete_user))
        .with_state(state.clone())
        .layer(axum::middleware::from_fn(require_admin))
        .layer(axum::middleware::from_fn(auth));

    Router::new()
        .route("/", get(app))
        .route("/error", get(error))
        .route("/login", get(login).post(login_form))
        .route("/login/cancel", post(login_cancel))
        .route("/logout", get(logout))
        .nest("/chat", chat_router)
        .nest("/admin", admin_router)
        .with_state(state)
}
