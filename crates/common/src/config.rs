use serde::Deserialize;

use crate::types::ConfigDefaults;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Destination used for tenants without an override (e.g., a shared channel id)
    pub default_notify_destination_id: Option<String>,

    /// Per-tenant poll interval in seconds when no override is set (default: 30)
    pub default_poll_interval_secs: u64,

    /// Delay between successive recipients in one delivery pass (default: 1500 ms)
    pub default_message_spacing_ms: u64,

    /// Maximum number of pending deliveries pulled per tenant pass (default: 500)
    pub delivery_batch_limit: i64,

    /// Discord bot token used by the delivery adapter
    pub discord_bot_token: Option<String>,

    /// Port for the health endpoint (default: 3000)
    pub http_port: u16,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            default_notify_destination_id: std::env::var("DEFAULT_NOTIFY_DESTINATION_ID").ok(),
            default_poll_interval_secs: std::env::var("DEFAULT_POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DEFAULT_POLL_INTERVAL_SECS must be a valid u64"))?,
            default_message_spacing_ms: std::env::var("DEFAULT_MESSAGE_SPACING_MS")
                .unwrap_or_else(|_| "1500".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DEFAULT_MESSAGE_SPACING_MS must be a valid u64"))?,
            delivery_batch_limit: std::env::var("DELIVERY_BATCH_LIMIT")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DELIVERY_BATCH_LIMIT must be a valid i64"))?,
            discord_bot_token: std::env::var("DISCORD_BOT_TOKEN").ok(),
            http_port: std::env::var("HTTP_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("HTTP_PORT must be a valid u16"))?,
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
        })
    }

    /// Process-wide defaults that per-tenant overrides fall back to.
    pub fn defaults(&self) -> ConfigDefaults {
        ConfigDefaults {
            notify_destination_id: self.default_notify_destination_id.clone(),
            poll_interval_secs: self.default_poll_interval_secs,
            message_spacing_ms: self.default_message_spacing_ms,
        }
    }
}
