//! Lazily created, cached webhook endpoints.

use std::sync::Arc;

use crate::domain::{GuildId, InstanceRegistry, Webhook};
use crate::error::BotError;
use crate::persistence::Store;

/// Resolves the webhook URL of a (guild, channel name), creating and
/// caching a webhook on first use.
#[derive(Debug, Clone)]
pub struct WebhookResolver {
    store: Arc<dyn Store>,
    registry: Arc<InstanceRegistry>,
    webhook_name: String,
}

impl WebhookResolver {
    /// Creates a resolver that names the webhooks it creates
    /// `webhook_name`.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<InstanceRegistry>,
        webhook_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            webhook_name: webhook_name.into(),
        }
    }

    /// The delivery URL for `channel_name` in `guild_id`.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::NotConnected`] when no connection serves the
    /// guild, a [`BotError::Platform`] error when the channel is missing or
    /// the webhook cannot be created, or a persistence error.
    pub async fn resolve(&self, guild_id: GuildId, channel_name: &str) -> Result<String, BotError> {
        let connection = self.registry.resolve(guild_id).await?;
        let channel = connection.find_channel(guild_id, channel_name).await?;

        if let Some(cached) = self.store.webhook(guild_id, channel.id).await? {
            return Ok(cached.uri);
        }

        let remote = connection
            .create_webhook(guild_id, channel.id, &self.webhook_name)
            .await?;
        let webhook = Webhook {
            guild_id,
            channel_id: channel.id,
            uri: remote.url,
            remote_id: remote.id,
            remote_token: remote.token,
        };
        self.store.add_webhook(&webhook).await?;

        tracing::info!(%guild_id, channel = channel_name, "created webhook");
        Ok(webhook.uri)
    }

    /// Drops a cached webhook so the next [`resolve`](Self::resolve)
    /// creates a fresh one.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the cache cannot be updated.
    pub async fn invalidate(&self, uri: &str) -> Result<bool, BotError> {
        let removed = self.store.delete_webhook(uri).await?;
        if removed {
            tracing::debug!("invalidated cached webhook");
        }
        Ok(removed)
    }
}
