//! Process configuration
//!
//! Loads `.env` (dotenvy) and then deserializes environment variables through
//! the `config` crate. The environment map can be injected with
//! [`GatewayConfig::from_source`] / [`HandlerConfig::from_source`] so tests
//! never read or mutate the real process environment.

use crate::error::DispatchError;
use config::{Config, Environment};
use serde::Deserialize;
use twilight_gateway::Intents;

/// Default JetStream key/value bucket for shard sessions
pub const DEFAULT_SESSION_BUCKET: &str = "gateway-sessions";

/// Default consumer group shared by every handler instance
pub const DEFAULT_CONSUMER_GROUP: &str = "handler";

/// Default JetStream key/value bucket for linked accounts
pub const DEFAULT_ACCOUNT_BUCKET: &str = "account-links";

/// Connection-owning process configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Discord bot token
    pub discord_token: String,

    /// Pool ID for this gateway instance (0-indexed)
    /// Each pool manages SHARDS_PER_POOL shards
    pub pool_id: u64,

    /// Total number of shards across all pools
    pub total_shards: u64,

    /// NATS server URL(s) - comma-separated for multiple servers.
    /// Absent means local mode: in-memory sessions, nothing published.
    pub nats_url: Option<String>,

    /// Health/metrics HTTP port
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Key/value bucket holding resumable shard sessions
    pub session_bucket: String,
}

impl GatewayConfig {
    /// Load configuration from `.env` and environment variables
    pub fn from_env() -> Result<Self, DispatchError> {
        dotenvy::dotenv().ok();
        Self::from_source(Environment::default())
    }

    /// Load configuration from an explicit environment source
    pub fn from_source(env: Environment) -> Result<Self, DispatchError> {
        let settings = Config::builder()
            .set_default("pool_id", 0_i64)
            .and_then(|b| b.set_default("total_shards", 1_i64))
            .and_then(|b| b.set_default("http_port", 9090_i64))
            .and_then(|b| b.set_default("log_level", "info"))
            .and_then(|b| b.set_default("session_bucket", DEFAULT_SESSION_BUCKET))
            .map_err(config_error)?
            .add_source(env.try_parsing(true))
            .build()
            .map_err(config_error)?;

        let config: Self = settings.try_deserialize().map_err(config_error)?;

        if config.total_shards == 0 {
            return Err(DispatchError::Config(
                "TOTAL_SHARDS must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }

    /// Get configured Discord intents
    ///
    /// Handlers receive message and member traffic in addition to guild
    /// lifecycle events, so message content is requested as well.
    pub fn intents() -> Intents {
        Intents::GUILDS
            | Intents::GUILD_MESSAGES
            | Intents::MESSAGE_CONTENT
            | Intents::GUILD_MEMBERS
    }
}

/// Handler process configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HandlerConfig {
    /// Discord bot token (interaction replies and command deploys)
    pub discord_token: String,

    /// NATS server URL(s)
    pub nats_url: String,

    /// Durable consumer name; identical across instances so they share load
    pub consumer_group: String,

    /// Health/metrics HTTP port
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Origin API base URL, e.g. `http://api:8080`
    pub api_url: String,

    /// Key/value bucket mapping Discord users to linked accounts
    pub account_bucket: String,

    /// Log interactions whose key has no registered handler at info level
    pub log_unknown_keys: bool,
}

impl HandlerConfig {
    /// Load configuration from `.env` and environment variables
    pub fn from_env() -> Result<Self, DispatchError> {
        dotenvy::dotenv().ok();
        Self::from_source(Environment::default())
    }

    /// Load configuration from an explicit environment source
    pub fn from_source(env: Environment) -> Result<Self, DispatchError> {
        let settings = Config::builder()
            .set_default("consumer_group", DEFAULT_CONSUMER_GROUP)
            .and_then(|b| b.set_default("http_port", 9091_i64))
            .and_then(|b| b.set_default("log_level", "info"))
            .and_then(|b| b.set_default("account_bucket", DEFAULT_ACCOUNT_BUCKET))
            .and_then(|b| b.set_default("log_unknown_keys", false))
            .map_err(config_error)?
            .add_source(env.try_parsing(true))
            .build()
            .map_err(config_error)?;

        let config: Self = settings.try_deserialize().map_err(config_error)?;

        if config.consumer_group.is_empty() {
            return Err(DispatchError::Config(
                "CONSUMER_GROUP must not be empty".to_string(),
            ));
        }

        Ok(config)
    }
}

fn config_error(err: config::ConfigError) -> DispatchError {
    DispatchError::Config(err.to_string())
}
