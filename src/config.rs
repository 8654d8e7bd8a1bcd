use std::{net::SocketAddr, time::Duration};

use chrono::FixedOffset;

use thiserror::Error;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Runtime settings, read from the environment (and `.env` through dotenv).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub migrations_path: String,
    pub api_base_url: String,
    pub bind_addr: SocketAddr,
    pub templates_glob: String,
    pub assets_dir: String,
    pub system_prompt: String,
    pub completion_retries: u32,
    pub completion_retry_delay: Duration,
    pub session_idle_ttl: Duration,
    /// Offset from UTC used to place chats in sidebar months.
    pub calendar_offset: FixedOffset,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let or = |key: &'static str, default: &str| lookup(key).unwrap_or_else(|| default.into());

        let bind_addr = or("BIND_ADDR", "0.0.0.0:3000");
        let bind_addr: SocketAddr = bind_addr.parse().map_err(|_| ConfigError::Invalid {
            key: "BIND_ADDR",
            value: bind_addr.clone(),
        })?;

        let retries = or("COMPLETION_RETRIES", "2");
        let completion_retries: u32 = retries.parse().map_err(|_| ConfigError::Invalid {
            key: "COMPLETION_RETRIES",
            value: retries.clone(),
        })?;

        let delay = or("COMPLETION_RETRY_DELAY_MS", "1000");
        let delay_ms: u64 = delay.parse().map_err(|_| ConfigError::Invalid {
            key: "COMPLETION_RETRY_DELAY_MS",
            value: delay.clone(),
        })?;

        let idle = or("SESSION_IDLE_MINUTES", "60");
        let idle_minutes: u64 = idle.parse().map_err(|_| ConfigError::Invalid {
            key: "SESSION_IDLE_MINUTES",
            value: idle.clone(),
        })?;

        let offset = or("CALENDAR_OFFSET_MINUTES", "0");
        let calendar_offset = offset
            .parse::<i32>()
            .ok()
            .and_then(|minutes| minutes.checked_mul(60))
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ConfigError::Invalid {
                key: "CALENDAR_OFFSET_MINUTES",
                value: offset.clone(),
            })?;

        Ok(Self {
            database_path: or("DATABASE_PATH", "chatdeck.db"),
            migrations_path: or("MIGRATIONS_PATH", "migrations"),
            api_base_url: or("API_BASE_URL", "http://localhost:8787/api")
                .trim_end_matches('/')
                .to_string(),
            bind_addr,
            templates_glob: or("TEMPLATES_GLOB", "templates/**/*"),
            assets_dir: or("ASSETS_DIR", "assets"),
            system_prompt: or("SYSTEM_PROMPT", DEFAULT_SYSTEM_PROMPT),
            completion_retries,
            completion_retry_delay: Duration::from_millis(delay_ms),
            session_idle_ttl: Duration::from_secs(idle_minutes * 60),
            calendar_offset,
        })
    }
}
