use axum::{
    extract::{Extension, Path, State},
    response::Html,
    Form,
};
use serde::{Deserialize, Serialize};
use tera::Context;

use std::sync::Arc;

use super::error::AppError;
use crate::{client::users::Account, gate::AuthToken, AppState};

const LOAD_FAILED: &str = "Could not load users.";

#[derive(Serialize, Debug)]
struct AccountRow {
    username: String,
    role: String,
    created: String,
    protected: bool,
}

impl From<&Account> for AccountRow {
    fn from(account: &Account) -> Self {
        let created = account
            .created_at
            .as_deref()
            .map(|raw| {
                chrono::DateTime::parse_from_rfc3339(raw)
                    .map(|at| at.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|_| raw.to_string())
            })
            .unwrap_or_default();
        Self {
            username: account.username.clone(),
            role: account.role.clone(),
            created,
            protected: account.is_admin(),
        }
    }
}

#[derive(Serialize, Debug)]
struct Notice {
    kind: &'static str,
    text: String,
}

impl Notice {
    fn success(text: impl Into<String>) -> Self {
        Self {
            kind: "success",
            text: text.into(),
        }
    }

    fn error(text: impl Into<String>) -> Self {
        Self {
            kind: "error",
            text: text.into(),
        }
    }
}

async fn render_admin(
    state: &AppState,
    token: &AuthToken,
    notice: Option<Notice>,
) -> Result<Html<String>, AppError> {
    let (rows, load_error) = match state.users.list(&token.token).await {
        Ok(accounts) => (
            accounts.iter().map(AccountRow::from).collect::<Vec<_>>(),
            None,
        ),
        Err(e) => {
            tracing::error!("listing users: {}", e);
            (Vec::new(), Some(e.user_message(LOAD_FAILED)))
        }
    };

    let mut context = Context::new();
    context.insert("users", &rows);
    context.insert("load_error", &load_error);
    context.insert("notice", &notice);
    let view = state.tera.render("views/admin.html", &context)?;

    let mut context = Context::new();
    context.insert("view", &view);
    context.insert("signed_in", &true);
    context.insert("current_user", &token.username);
    context.insert("is_admin", &true);
    let rendered = state.tera.render("views/main.html", &context)?;

    Ok(Html(rendered))
}

#[axum::debug_handler]
pub async fn admin(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<AuthToken>,
) -> Result<Html<String>, AppError> {
    render_admin(&state, &token, None).await
}

#[derive(Deserialize, Debug)]
pub struct NewUser {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[axum::debug_handler]
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<AuthToken>,
    Form(new_user): Form<NewUser>,
) -> Result<Html<String>, AppError> {
    let username = new_user.username.trim();
    let notice = if username.is_empty() || new_user.password.is_empty() {
        Notice::error("Username and password are both required.")
    } else {
        match state
            .users
            .create(&token.token, username, &new_user.password)
            .await
        {
            Ok(()) => {
                tracing::info!("created user {}", username);
                Notice::success(format!("User {} created.", username))
            }
            Err(e) => {
                tracing::warn!("creating user {}: {}", username, e);
                Notice::error(e.user_message("Could not create the user."))
            }
        }
    };
    render_admin(&state, &token, Some(notice)).await
}

#[axum::debug_handler]
pub async fn delete_user(
    Path(username): Path<String>,
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<AuthToken>,
) -> Result<Html<String>, AppError> {
    let protected = match state.users.list(&token.token).await {
        Ok(accounts) => accounts
            .iter()
            .any(|a| a.username == username && a.is_admin()),
        Err(e) => {
            tracing::error!("listing users: {}", e);
            let notice = Notice::error(e.user_message(LOAD_FAILED));
            return render_admin(&state, &token, Some(notice)).await;
        }
    };

    let notice = if protected {
        Notice::error("Admin accounts cannot be deleted.")
    } else {
        match state.users.delete(&token.token, &username).await {
            Ok(()) => {
                tracing::info!("deleted user {}", username);
                Notice::success(format!("User {} deleted.", username))
            }
            Err(e) => {
                tracing::warn!("deleting user {}: {}", username, e);
                Notice::error(e.user_message("Could not delete the user."))
            }
        }
    };
    render_admin(&state, &token, Some(notice)).await
}
