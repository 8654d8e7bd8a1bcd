use anyhow::Context as _;
use axum::Router;
use chrono::FixedOffset;
use sqlx::{
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use tera::Tera;
use tower_cookies::CookieManagerLayer;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::{path::Path, sync::Arc, time::Duration};

mod chat;
mod client;
mod config;
mod data;
mod gate;
mod middleware;
mod render;
mod router;

use chat::registry::SessionRegistry;
use client::{
    auth::{AuthBackend, AuthClient},
    completion::{CompletionBackend, CompletionClient},
    users::UsersClient,
};
use config::Config;
use data::storage::{Profiles, SqliteProfiles};
use middleware::{extract_session, handle_error};
use router::app_router;

pub struct AppState {
    pub tera: Tera,
    pub profiles: Arc<dyn Profiles>,
    pub sessions: SessionRegistry,
    pub completion: Arc<dyn CompletionBackend>,
    pub auth: Arc<dyn AuthBackend>,
    pub users: UsersClient,
    pub system_prompt: String,
    pub calendar_offset: FixedOffset,
}

/// The full application: routes, static files and the session/error layers.
pub fn build_app(state: Arc<AppState>, assets_dir: &str) -> Router {
    Router::new()
        .nest_service("/assets", ServeDir::new(assets_dir))
        .merge(app_router(state.clone()))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            handle_error,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            extract_session,
        ))
        .layer(CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatdeck=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("reading configuration")?;

    let options = SqliteConnectOptions::new()
        .filename(&config.database_path)
        .journal_mode(SqliteJournalMode::Wal)
        .create_if_missing(true);

    // setup connection pool
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(3))
        .connect_with(options)
        .await
        .with_context(|| format!("opening database {}", config.database_path))?;

    let migrator = Migrator::new(Path::new(&config.migrations_path))
        .await
        .with_context(|| format!("loading migrations from {}", config.migrations_path))?;
    migrator.run(&pool).await.context("running migrations")?;

    let tera = Tera::new(&config.templates_glob)
        .with_context(|| format!("parsing templates {}", config.templates_glob))?;

    let http = reqwest::Client::new();
    let state = AppState {
        tera,
        profiles: Arc::new(SqliteProfiles::new(Arc::new(pool))),
        sessions: SessionRegistry::new(config.session_idle_ttl),
        completion: Arc::new(CompletionClient::new(
            http.clone(),
            &config.api_base_url,
            config.completion_retries,
            config.completion_retry_delay,
        )),
        auth: Arc::new(AuthClient::new(http.clone(), &config.api_base_url)),
        users: UsersClient::new(http, &config.api_base_url),
        system_prompt: config.system_prompt.clone(),
        calendar_offset: config.calendar_offset,
    };

    let app = build_app(Arc::new(state), &config.assets_dir);

    tracing::info!(
        "listening on {}, remote api at {}",
        config.bind_addr,
        config.api_base_url
    );
    axum::Server::bind(&config.bind_addr)
        .serve(app.into_make_service())
        .await
        .context("server stopped")?;

    Ok(())
}
