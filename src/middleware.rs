use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
    Extension,
};
use chrono::Utc;
use tera::Context;
use tower_cookies::{Cookie, Cookies};
use uuid::Uuid;

use std::sync::Arc;

use crate::{
    data::storage::Storage,
    gate::{self, AuthToken},
    AppState,
};

pub const SESSION_COOKIE: &str = "chatdeck-session";

/// The browser session a request belongs to, with its storage profile.
#[derive(Clone)]
pub struct Session {
    pub id: String,
    pub storage: Arc<dyn Storage>,
}

fn is_htmx(headers: &HeaderMap) -> bool {
    headers.contains_key("HX-Request")
}

/// Plain redirect for page loads, `HX-Redirect` for htmx requests.
pub fn redirect(headers: &HeaderMap, to: &str) -> Response {
    if !is_htmx(headers) {
        return Redirect::to(to).into_response();
    }
    match HeaderValue::from_str(to) {
        Ok(value) => {
            let mut response = StatusCode::OK.into_response();
            response.headers_mut().insert("HX-Redirect", value);
            response
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Renders `views/error.html` inside the page layout.
pub fn render_error_page(
    state: &AppState,
    current_user: Option<&AuthToken>,
    code: u16,
    message: &str,
) -> Result<String, tera::Error> {
    let mut context = Context::new();
    context.insert("status_code", &code);
    context.insert("status_text", message);
    let error = state.tera.render("views/error.html", &context)?;

    let mut context = Context::new();
    context.insert("view", &error);
    context.insert("signed_in", &current_user.is_some());
    context.insert("current_user", &current_user.and_then(|t| t.username.clone()));
    context.insert("is_admin", &current_user.map_or(false, AuthToken::is_admin));
    state.tera.render("views/main.html", &context)
}

pub async fn extract_session<B>(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    mut req: Request<B>,
    next: Next<B>,
) -> Response
where
    B: Send + 'static,
{
    let existing = cookies
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| Uuid::parse_str(v).is_ok());

    let id = match existing {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4().to_string();
            let cookie = Cookie::build(SESSION_COOKIE, id.clone())
                .path("/")
                .http_only(true)
                .finish();
            cookies.add(cookie);
            tracing::debug!("new session {}", id);
            id
        }
    };

    let storage = state.profiles.profile(&id);
    req.extensions_mut().insert(Session { id, storage });
    next.run(req).await
}

pub async fn auth<B>(
    Extension(session): Extension<Session>,
    mut req: Request<B>,
    next: Next<B>,
) -> Response
where
    B: Send + 'static,
{
    match gate::current_token(&*session.storage, Utc::now()).await {
        Ok(Some(token)) => {
            req.extensions_mut().insert(token);
            next.run(req).await
        }
        Ok(None) => redirect(req.headers(), "/login"),
        Err(e) => {
            tracing::error!("reading auth token: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn require_admin<B>(
    Extension(token): Extension<AuthToken>,
    req: Request<B>,
    next: Next<B>,
) -> Response
where
    B: Send + 'static,
{
    if token.is_admin() {
        next.run(req).await
    } else {
        tracing::warn!("non-admin session tried {}", req.uri().path());
        StatusCode::FORBIDDEN.into_response()
    }
}

pub async fn handle_error<B>(
    Extension(session): Extension<Session>,
    State(state): State<Arc<AppState>>,
    req: Request<B>,
    next: Next<B>,
) -> Response
where
    B: Send + 'static,
{
    let response = next.run(req).await;

    let status = response.status();
    if status.as_u16() < 400 {
        return response;
    }

    let current_user = gate::current_token(&*session.storage, Utc::now())
        .await
        .ok()
        .flatten();
    let message = status.canonical_reason().unwrap_or("Error");

    match render_error_page(&state, current_user.as_ref(), status.as_u16(), message) {
        Ok(rendered) => (status, Html(rendered)).into_response(),
        Err(e) => {
            tracing::error!("rendering error page: {}", e);
            response
        }
    }
}
