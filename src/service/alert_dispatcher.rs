//! Fan-out of inbound balance-change events to configured alert channels.
//!
//! For every guild whose default coin matches the event, each enabled
//! alert instance whose amount range admits the event gets one rendered
//! message through the channel's webhook. A failed POST invalidates the
//! cached webhook and is retried once through a freshly created one.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::delivery::WebhookTransport;
use super::template::render_alert;
use super::webhooks::WebhookResolver;
use crate::domain::{
    AlertInstance, AlertKind, AlertPayload, BotEvent, EventBus, GuildId, InstanceRegistry,
};
use crate::error::BotError;
use crate::persistence::Store;
use crate::platform::BalanceClient;

/// Outcome counts of one [`AlertDispatcher::process_payload`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    /// Guilds with the event enabled.
    pub guilds_matched: usize,
    /// Messages delivered.
    pub delivered: usize,
    /// Instances skipped: filtered out, blank channel, or unreachable.
    pub skipped: usize,
    /// Instances whose delivery failed, retry included.
    pub failed: usize,
}

/// Matches events against alert settings and delivers the messages.
#[derive(Debug, Clone)]
pub struct AlertDispatcher {
    store: Arc<dyn Store>,
    webhooks: WebhookResolver,
    transport: Arc<dyn WebhookTransport>,
    balances: Arc<dyn BalanceClient>,
    events: EventBus,
}

impl AlertDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        webhooks: WebhookResolver,
        transport: Arc<dyn WebhookTransport>,
        balances: Arc<dyn BalanceClient>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            webhooks,
            transport,
            balances,
            events,
        }
    }

    /// Convenience constructor building the [`WebhookResolver`] from the
    /// registry.
    #[must_use]
    pub fn with_registry(
        store: Arc<dyn Store>,
        registry: Arc<InstanceRegistry>,
        webhook_name: &str,
        transport: Arc<dyn WebhookTransport>,
        balances: Arc<dyn BalanceClient>,
        events: EventBus,
    ) -> Self {
        let webhooks = WebhookResolver::new(Arc::clone(&store), registry, webhook_name);
        Self::new(store, webhooks, transport, balances, events)
    }

    /// Records the event and delivers it to every matching alert instance.
    ///
    /// Per-guild and per-instance failures are counted in the report and
    /// never abort the fan-out.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::InvalidPayload`] for an unknown event, a blank
    /// coin or a missing amount, and a persistence error if the event
    /// cannot be recorded or the matching guilds cannot be listed.
    pub async fn process_payload(&self, payload: &AlertPayload) -> Result<DispatchReport, BotError> {
        let kind = payload.kind()?;
        let coin = payload.coin_kind.trim();
        if coin.is_empty() {
            return Err(BotError::InvalidPayload("missing coinKind".into()));
        }
        let amount = payload.amount(kind).ok_or_else(|| {
            BotError::InvalidPayload(format!("missing or non-numeric {}", kind.amount_field()))
        })?;

        self.store.add_event(kind, coin, Utc::now()).await?;

        let guilds = self.store.guilds_by_coin(coin).await?;
        let icon_url = self.balances.coin_image_url(coin);
        let mut report = DispatchReport::default();

        for guild_id in guilds {
            let settings = match self.store.alerts_settings(guild_id).await {
                Ok(Some(settings)) => settings,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(%guild_id, error = %e, "could not load alert settings");
                    continue;
                }
            };
            let instances = settings.enabled_instances(kind);
            if instances.is_empty() {
                continue;
            }
            report.guilds_matched += 1;

            for instance in instances {
                if instance.channel_name.trim().is_empty() {
                    report.skipped += 1;
                    continue;
                }
                if !instance.settings.amount_range().contains(amount) {
                    report.skipped += 1;
                    continue;
                }

                match self
                    .deliver(guild_id, kind, payload, instance, &icon_url)
                    .await
                {
                    Ok(()) => report.delivered += 1,
                    Err(e) if e.is_skippable() => {
                        tracing::debug!(
                            %guild_id,
                            channel = %instance.channel_name,
                            reason = %e,
                            "alert instance unreachable, skipping"
                        );
                        report.skipped += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            %guild_id,
                            channel = %instance.channel_name,
                            error = %e,
                            "alert delivery failed"
                        );
                        report.failed += 1;
                    }
                }
            }
        }

        tracing::info!(
            event = %kind,
            coin,
            guilds = report.guilds_matched,
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failed,
            "processed payload"
        );
        Ok(report)
    }

    /// Delivers one instance's message, retrying once through a fresh
    /// webhook when the cached one rejects it.
    async fn deliver(
        &self,
        guild_id: GuildId,
        kind: AlertKind,
        payload: &AlertPayload,
        instance: &AlertInstance,
        icon_url: &str,
    ) -> Result<(), BotError> {
        let message = render_alert(kind, payload, &instance.settings, icon_url);
        let mut is_retry = false;

        loop {
            let url = self
                .webhooks
                .resolve(guild_id, &instance.channel_name)
                .await?;

            match self.transport.post(&url, &message).await {
                Ok(()) => {
                    self.events.publish(BotEvent::AlertDelivered {
                        guild_id,
                        kind,
                        channel: instance.channel_name.clone(),
                    });
                    return Ok(());
                }
                Err(BotError::DeliveryFailed(reason)) if !is_retry => {
                    tracing::info!(%guild_id, %reason, "webhook rejected delivery, recreating");
                    self.webhooks.invalidate(&url).await?;
                    is_retry = true;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
