//! Outbound webhook messages and their HTTP transport.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BotError;

/// Colour used when none is configured or the configured one is invalid.
pub const DEFAULT_COLOUR: u32 = 0x00ff_0000;

/// Body POSTed to a webhook URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookMessage {
    /// Rich embeds, one per message in practice.
    pub embeds: Vec<Embed>,
}

impl WebhookMessage {
    /// A message carrying a single embed.
    #[must_use]
    pub fn single(embed: Embed) -> Self {
        Self {
            embeds: vec![embed],
        }
    }
}

/// One rich embed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    /// Body text.
    pub description: String,
    /// RGB colour.
    pub color: u32,
    /// Header line with icon.
    pub author: EmbedAuthor,
    /// ISO-8601 timestamp shown in the footer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Embed header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedAuthor {
    /// Header text.
    pub name: String,
    /// Header icon URL.
    pub icon_url: String,
}

/// Posts messages to webhook URLs.
#[async_trait]
pub trait WebhookTransport: Send + Sync + fmt::Debug {
    /// Delivers `message` to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::DeliveryFailed`] on a transport error, a
    /// timeout or a non-success status.
    async fn post(&self, url: &str, message: &WebhookMessage) -> Result<(), BotError>;
}

/// [`WebhookTransport`] over `reqwest`, with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpWebhookTransport {
    client: reqwest::Client,
}

impl HttpWebhookTransport {
    /// Builds the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Internal`] if the client cannot be constructed.
    pub fn new(timeout: Duration) -> Result<Self, BotError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("rallybot/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| BotError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for HttpWebhookTransport {
    async fn post(&self, url: &str, message: &WebhookMessage) -> Result<(), BotError> {
        let response = self
            .client
            .post(url)
            .json(message)
            .send()
            .await
            .map_err(|e| BotError::DeliveryFailed(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(BotError::DeliveryFailed(format!("webhook returned {status}")))
        }
    }
}
