//! The daily statistics job: a self re-arming `daily_stats` timer chain.
//!
//! Each fire sweeps week-old event counters, posts the day's figures for
//! the guild's default coin and arms the next timer for the following
//! local midnight with `generation + 1`. The chain stops at the first fire
//! after its alert instance is disabled or removed.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::task::JoinHandle;

use super::delivery::{DEFAULT_COLOUR, Embed, EmbedAuthor, WebhookMessage, WebhookTransport};
use super::timer_engine::{TimerEngine, resolve_expiry};
use super::webhooks::WebhookResolver;
use crate::domain::{
    AlertKind, BotId, DAILY_STATS_EVENT, DailyStatsExtras, GuildId, InstanceRegistry, NewTimer,
    Timer, TimerId,
};
use crate::error::{BotError, PlatformError};
use crate::persistence::Store;
use crate::platform::{BalanceClient, CoinRewards, CoinSummary};

/// Event counters older than this are deleted on every fire.
const RETENTION_DAYS: i64 = 7;

/// Handles fired `daily_stats` timers and arms new chains.
#[derive(Debug, Clone)]
pub struct DailyStats {
    store: Arc<dyn Store>,
    registry: Arc<InstanceRegistry>,
    webhooks: WebhookResolver,
    transport: Arc<dyn WebhookTransport>,
    balances: Arc<dyn BalanceClient>,
    timers: TimerEngine,
}

impl DailyStats {
    /// Creates the job.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<InstanceRegistry>,
        webhooks: WebhookResolver,
        transport: Arc<dyn WebhookTransport>,
        balances: Arc<dyn BalanceClient>,
        timers: TimerEngine,
    ) -> Self {
        Self {
            store,
            registry,
            webhooks,
            transport,
            balances,
            timers,
        }
    }

    /// Registers as the handler of `daily_stats` timers and handles every
    /// one the engine fires. The route is in place when this returns.
    pub async fn spawn_listener(self: Arc<Self>) -> JoinHandle<()> {
        let mut fired = self.timers.route(DAILY_STATS_EVENT).await;
        tokio::spawn(async move {
            while let Some(timer) = fired.recv().await {
                let guild_id = timer.guild_id;
                if let Err(e) = self.handle(timer).await {
                    tracing::warn!(%guild_id, error = %e, "daily stats handler failed");
                }
            }
        })
    }

    /// Arms the first timer of a chain for one alert instance.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::NotConnected`] when no connection serves the
    /// guild, [`PlatformError::Forbidden`] when the bot may not manage
    /// webhooks there, or a persistence error.
    pub async fn start(
        &self,
        guild_id: GuildId,
        channel_name: &str,
        timezone: Value,
    ) -> Result<TimerId, BotError> {
        let connection = self.registry.resolve(guild_id).await?;
        if !connection.can_manage_webhooks(guild_id).await? {
            return Err(PlatformError::Forbidden(format!(
                "missing manage-webhooks permission in guild {guild_id}"
            ))
            .into());
        }

        let extras = DailyStatsExtras {
            channel_name: channel_name.to_string(),
            timezone,
            generation: 0,
        };
        let expires_at = resolve_expiry(Utc::now().timestamp(), &extras.timezone);
        self.timers
            .create(NewTimer {
                guild_id,
                expires_at,
                event: DAILY_STATS_EVENT.into(),
                extras: extras.to_map(),
                bot_id: connection.user().id,
            })
            .await
    }

    /// Handles one fired timer: sweep, post, re-arm. Returns the id of the
    /// re-armed timer, or `None` when the alert instance is no longer
    /// configured and the chain ends.
    ///
    /// A failed post is logged and does not stop the re-arm.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::ConfigInvalid`] if the timer extras are not a
    /// daily-stats payload, or a persistence error from the re-arm.
    pub async fn handle(&self, timer: Timer) -> Result<Option<TimerId>, BotError> {
        let extras = DailyStatsExtras::from_map(&timer.extras).ok_or_else(|| {
            BotError::ConfigInvalid(format!("timer {} has no daily stats extras", timer.id))
        })?;
        if !self
            .still_configured(timer.guild_id, &extras.channel_name)
            .await
        {
            tracing::info!(
                guild_id = %timer.guild_id,
                channel = %extras.channel_name,
                generation = extras.generation,
                "daily stats instance removed, chain stopped"
            );
            return Ok(None);
        }
        let now = Utc::now();

        match self
            .store
            .delete_events_before(now - Duration::days(RETENTION_DAYS))
            .await
        {
            Ok(swept) => tracing::debug!(swept, "swept old event counters"),
            Err(e) => tracing::warn!(error = %e, "event counter sweep failed"),
        }

        if let Err(e) = self.post(timer.guild_id, &extras.channel_name, now).await {
            tracing::warn!(
                guild_id = %timer.guild_id,
                channel = %extras.channel_name,
                error = %e,
                "daily stats not posted"
            );
        }

        self.rearm(&timer, &extras).await.map(Some)
    }

    /// Whether an enabled `daily_stats` instance still posts to
    /// `channel_name`. A settings lookup failure keeps the chain alive.
    async fn still_configured(&self, guild_id: GuildId, channel_name: &str) -> bool {
        match self.store.alerts_settings(guild_id).await {
            Ok(Some(settings)) => settings
                .enabled_instances(AlertKind::DailyStats)
                .iter()
                .any(|instance| instance.channel_name == channel_name),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(%guild_id, error = %e, "alert settings unavailable, keeping chain");
                true
            }
        }
    }

    async fn post(
        &self,
        guild_id: GuildId,
        channel_name: &str,
        now: DateTime<Utc>,
    ) -> Result<(), BotError> {
        let url = self.webhooks.resolve(guild_id, channel_name).await?;
        let coin = self
            .store
            .default_coin(guild_id)
            .await?
            .ok_or_else(|| BotError::NotFound(format!("guild {guild_id} has no default coin")))?;

        let since = now - Duration::hours(24);
        let mut day_counts = Vec::with_capacity(AlertKind::EVENTS.len());
        for kind in AlertKind::EVENTS {
            day_counts.push((kind, self.store.count_events(kind, &coin, since).await?));
        }
        let summary = self.balances.coin_summary(&coin).await?;
        let rewards = self.balances.coin_rewards(&coin).await?;

        let message = stats_message(
            &coin,
            &day_counts,
            &summary,
            &rewards,
            &self.balances.coin_image_url(&coin),
            now,
        );
        self.transport.post(&url, &message).await?;
        tracing::info!(%guild_id, coin, "posted daily stats");
        Ok(())
    }

    async fn rearm(&self, timer: &Timer, extras: &DailyStatsExtras) -> Result<TimerId, BotError> {
        let bot_id = self.owner_for_rearm(timer.bot_id).await;
        let next = extras.next_generation();
        let expires_at = resolve_expiry(Utc::now().timestamp(), &next.timezone);
        let id = self
            .timers
            .create(NewTimer {
                guild_id: timer.guild_id,
                expires_at,
                event: DAILY_STATS_EVENT.into(),
                extras: next.to_map(),
                bot_id,
            })
            .await?;
        tracing::info!(
            guild_id = %timer.guild_id,
            %bot_id,
            generation = next.generation,
            expires_at,
            "daily stats re-armed"
        );
        Ok(id)
    }

    /// The timer's own bot if it is still connected, else the default bot.
    /// With neither available the original owner is kept so its next
    /// recovery picks the timer up.
    async fn owner_for_rearm(&self, bot_id: BotId) -> BotId {
        if self.registry.contains(bot_id).await {
            return bot_id;
        }
        self.registry.default_bot_id().await.unwrap_or(bot_id)
    }
}

fn round3(value: f64) -> f64 {
    (value * 1_000.0).round() / 1_000.0
}

/// The fixed-layout statistics embed.
#[must_use]
pub fn stats_message(
    coin: &str,
    day_counts: &[(AlertKind, u64)],
    summary: &CoinSummary,
    rewards: &CoinRewards,
    icon_url: &str,
    now: DateTime<Utc>,
) -> WebhookMessage {
    let count = |kind: AlertKind| {
        day_counts
            .iter()
            .find(|(k, _)| *k == kind)
            .map_or(0, |(_, n)| *n)
    };
    let description = format!(
        "```xl\n\
         - Total coins: {}\n\n\
         - Total supporters: {}\n\n\
         - Total support volume: {} USD\n\n\n\
         - Today`s purchases: {}\n\n\
         - Today`s donations: {}\n\n\
         - Today`s transfers: {}\n\n\
         - Today`s conversions: {}\n\n\
         - Today`s redeems: {}\n\n\
         - Today`s rewards earned: {}\n```",
        round3(summary.total_coins),
        round3(summary.total_supporters),
        round3(summary.total_support_volume),
        count(AlertKind::Buy),
        count(AlertKind::Donate),
        count(AlertKind::Transfer),
        count(AlertKind::Convert),
        count(AlertKind::Redeem),
        round3(rewards.last_24_hour_earned),
    );
    WebhookMessage::single(Embed {
        description,
        color: DEFAULT_COLOUR,
        author: EmbedAuthor {
            name: format!("{coin} Daily Stats"),
            icon_url: icon_url.to_string(),
        },
        timestamp: Some(now.to_rfc3339()),
    })
}
