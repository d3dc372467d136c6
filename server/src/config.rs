use std::{env, str::FromStr};

use healthpatch_bridge::{history::DEFAULT_HISTORY_CAPACITY, SessionConfig};

/// Server configuration, read from the environment
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub database_url: String,
    pub static_dir: String,
    /// Connect to the reader on startup
    pub auto_connect: bool,
    pub history_capacity: usize,
    pub session: SessionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".into(),
            database_url: "sqlite:healthpatch.db?mode=rwc".into(),
            static_dir: "static".into(),
            auto_connect: true,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();
        let session = SessionConfig {
            device_label: env::var("DEVICE_LABEL").unwrap_or(defaults.session.device_label),
            presence_check_ms: parse_var("PRESENCE_CHECK_MS", defaults.session.presence_check_ms),
            tag_timeout_ms: parse_var("TAG_TIMEOUT_MS", defaults.session.tag_timeout_ms),
            discovery_queue: parse_var("DISCOVERY_QUEUE", defaults.session.discovery_queue),
        };

        Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            static_dir: env::var("STATIC_DIR").unwrap_or(defaults.static_dir),
            auto_connect: parse_var("AUTO_CONNECT", defaults.auto_connect),
            history_capacity: parse_var("HISTORY_CAPACITY", defaults.history_capacity),
            session,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid {}={:?}", name, raw);
            default
        }),
        Err(_) => default,
    }
}
