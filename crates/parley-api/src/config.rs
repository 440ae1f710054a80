//! Server configuration from environment variables.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `DATABASE_URL` | `postgres://localhost/parley` |
//! | `HOST` / `PORT` | `0.0.0.0` / `3000` |
//! | `STORE` | `postgres` (`memory` for local development) |
//! | `STATIC_TOKENS` | empty; `token=uuid,...` for the memory store |
//! | `STREAM_KEEPALIVE_SECS` | `30` |
//! | `STREAM_BUFFER` | `64` |
//! | `ALLOWED_ORIGINS` | `http://localhost:3000` |
//! | `RATE_LIMIT_ENABLED` | `true` |
//! | `RATE_LIMIT_REQUESTS` / `RATE_LIMIT_PERIOD_SECS` | `100` / `60` |
//! | `DB_MAX_CONNECTIONS` | `10` |

use std::str::FromStr;
use std::time::Duration;

use axum::http::HeaderValue;
use tracing::warn;

use parley_core::{defaults, Error, Result};
use parley_db::pool::DEFAULT_MAX_CONNECTIONS;

use crate::stream::StreamConfig;

const DEFAULT_ORIGINS: &str = "http://localhost:3000";

/// Which conversation store backs the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

impl FromStr for StoreKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(StoreKind::Postgres),
            "memory" | "mem" => Ok(StoreKind::Memory),
            other => Err(Error::Config(format!(
                "STORE must be 'postgres' or 'memory', got '{}'",
                other
            ))),
        }
    }
}

/// Global request rate limit.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests: u32,
    pub period: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests: 100,
            period: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub store: StoreKind,
    pub static_tokens: String,
    pub stream: StreamConfig,
    pub allowed_origins: Vec<HeaderValue>,
    pub rate_limit: RateLimitConfig,
    pub db_max_connections: u32,
}

impl ServerConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let store = match lookup("STORE") {
            Some(value) => value.parse()?,
            None => StoreKind::Postgres,
        };

        let keepalive_secs = parse_or(&lookup, "STREAM_KEEPALIVE_SECS", defaults::STREAM_KEEPALIVE.as_secs());
        let buffer = parse_or(&lookup, "STREAM_BUFFER", defaults::STREAM_BUFFER);

        Ok(Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| "postgres://localhost/parley".to_string()),
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "PORT", 3000),
            store,
            static_tokens: lookup("STATIC_TOKENS").unwrap_or_default(),
            stream: StreamConfig {
                keepalive_interval: Duration::from_secs(keepalive_secs.max(1)),
                buffer: buffer.max(1),
            },
            allowed_origins: parse_allowed_origins(
                lookup("ALLOWED_ORIGINS").as_deref().unwrap_or(DEFAULT_ORIGINS),
            ),
            rate_limit: RateLimitConfig {
                enabled: lookup("RATE_LIMIT_ENABLED")
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(true),
                requests: parse_or(&lookup, "RATE_LIMIT_REQUESTS", 100u32).max(1),
                period: Duration::from_secs(parse_or(&lookup, "RATE_LIMIT_PERIOD_SECS", 60u64).max(1)),
            },
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(
                    subsystem = "api",
                    component = "config",
                    key,
                    value = %raw,
                    default = %default,
                    "Invalid value, using default"
                );
                default
            }
        },
        None => default,
    }
}

/// Parse a comma-separated origin list, skipping entries that are not valid
/// header values. An empty list falls back to the local development origin.
pub fn parse_allowed_origins(origins: &str) -> Vec<HeaderValue> {
    let parsed: Vec<HeaderValue> = origins
        .split(',')
        .filter_map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("Invalid CORS origin '{}': {}", trimmed, e);
                    None
                }
            }
        })
        .collect();

    if parsed.is_empty() {
        vec![HeaderValue::from_static(DEFAULT_ORIGINS)]
    } else {
        parsed
    }
}
