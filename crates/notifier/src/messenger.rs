//! Outbound messaging capability.
//!
//! The delivery core only needs "send a text message to destination X, get a
//! message id back or fail". The capability check is explicit: a destination
//! resolves to sendable or not, checked once per pass, instead of probing the
//! shape of a channel object at send time.

use async_trait::async_trait;
use thiserror::Error;

/// Failure modes of the messaging capability, with human-readable causes.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("destination {0} not found or not sendable")]
    DestinationUnavailable(String),

    #[error("{0}")]
    Transport(String),
}

/// Capability to send rendered content to a destination.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Whether the destination exists and accepts text messages.
    async fn destination_sendable(&self, destination_id: &str) -> Result<bool, SendError>;

    /// Send `content` to the destination, returning the platform message id.
    async fn send(&self, destination_id: &str, content: &str) -> Result<String, SendError>;

    /// Render the mention prefix for an external user id.
    fn mention(&self, external_user_id: &str) -> String {
        format!("<@{external_user_id}>")
    }
}

/// Discord channel types that accept plain text messages:
/// GUILD_TEXT (0), GUILD_ANNOUNCEMENT (5), GUILD_FORUM (15).
const SENDABLE_CHANNEL_TYPES: [u64; 3] = [0, 5, 15];

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Messenger backed by the Discord REST API.
pub struct DiscordMessenger {
    http: reqwest::Client,
    bot_token: String,
}

impl DiscordMessenger {
    pub fn new(bot_token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token,
        }
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.bot_token)
    }
}

#[async_trait]
impl Messenger for DiscordMessenger {
    async fn destination_sendable(&self, destination_id: &str) -> Result<bool, SendError> {
        let response = self
            .http
            .get(format!("{DISCORD_API_BASE}/channels/{destination_id}"))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Ok(false);
        }

        let channel: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        Ok(channel
            .get("type")
            .and_then(|t| t.as_u64())
            .is_some_and(|t| SENDABLE_CHANNEL_TYPES.contains(&t)))
    }

    async fn send(&self, destination_id: &str, content: &str) -> Result<String, SendError> {
        let response = self
            .http
            .post(format!(
                "{DISCORD_API_BASE}/channels/{destination_id}/messages"
            ))
            .header("Authorization", self.auth_header())
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SendError::Transport(format!(
                "Discord API returned {status}: {body}"
            )));
        }

        let message: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        message
            .get("id")
            .and_then(|id| id.as_str())
            .map(String::from)
            .ok_or_else(|| SendError::Transport("message response missing id".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopMessenger;

    #[async_trait]
    impl Messenger for NoopMessenger {
        async fn destination_sendable(&self, _destination_id: &str) -> Result<bool, SendError> {
            Ok(true)
        }

        async fn send(&self, _destination_id: &str, _content: &str) -> Result<String, SendError> {
            Ok("m-1".to_string())
        }
    }

    #[test]
    fn test_default_mention_format() {
        assert_eq!(NoopMessenger.mention("12345"), "<@12345>");
    }

    #[test]
    fn test_send_error_messages_are_human_readable() {
        let err = SendError::DestinationUnavailable("chan-9".to_string());
        assert_eq!(err.to_string(), "destination chan-9 not found or not sendable");
        let err = SendError::Transport("network timeout".to_string());
        assert_eq!(err.to_string(), "network timeout");
    }
}
