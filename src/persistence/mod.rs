//! Persistence layer: the keyed store behind every durable record.
//!
//! [`Store`] is the only owner of durable state. Two implementations ship
//! with the crate: [`postgres::PostgresStore`] (`sqlx::PgPool`) and
//! [`memory::MemoryStore`], used when persistence is disabled and in tests.
//!
//! Every `delete_*` method reports whether a record was actually removed;
//! the timer engine relies on that to fire each timer at most once.

pub mod memory;
pub mod models;
pub mod postgres;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Activity, AlertKind, AlertsSettings, BotId, BotInstance, ChannelId, ChannelMapping, GuildId,
    MemberId, NewTimer, RoleMapping, StoredTask, TaskId, TaskKind, Timer, TimerId, Webhook,
};
use crate::error::BotError;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Durable keyed records consumed by the background core.
#[async_trait]
pub trait Store: Send + Sync + fmt::Debug {
    // ── Tasks ──────────────────────────────────────────────

    /// Queues a task, returning its id.
    async fn add_task(&self, task: &TaskKind) -> Result<TaskId, BotError>;

    /// Fetches one task.
    async fn get_task(&self, id: TaskId) -> Result<Option<StoredTask>, BotError>;

    /// All pending tasks, oldest first.
    async fn list_tasks(&self) -> Result<Vec<StoredTask>, BotError>;

    /// Deletes a task; `false` if it was already gone.
    async fn delete_task(&self, id: TaskId) -> Result<bool, BotError>;

    // ── Timers ─────────────────────────────────────────────

    /// Persists a timer, returning its id.
    async fn add_timer(&self, timer: &NewTimer) -> Result<TimerId, BotError>;

    /// Fetches one timer.
    async fn get_timer(&self, id: TimerId) -> Result<Option<Timer>, BotError>;

    /// Deletes a timer; `false` if it was already gone.
    async fn delete_timer(&self, id: TimerId) -> Result<bool, BotError>;

    /// All timers owned by a bot identity.
    async fn list_timers(&self, bot_id: BotId) -> Result<Vec<Timer>, BotError>;

    /// Deletes every timer of a guild, returning how many were removed.
    async fn delete_guild_timers(&self, guild_id: GuildId) -> Result<u64, BotError>;

    // ── Guild settings ─────────────────────────────────────

    /// Alert settings of a guild.
    async fn alerts_settings(&self, guild_id: GuildId)
    -> Result<Option<AlertsSettings>, BotError>;

    /// Replaces the alert settings of a guild.
    async fn set_alerts_settings(
        &self,
        guild_id: GuildId,
        settings: &AlertsSettings,
    ) -> Result<(), BotError>;

    /// Default coin of a guild.
    async fn default_coin(&self, guild_id: GuildId) -> Result<Option<String>, BotError>;

    /// Sets the default coin of a guild.
    async fn set_default_coin(&self, guild_id: GuildId, coin: &str) -> Result<(), BotError>;

    /// Guilds whose default coin is `coin`.
    async fn guilds_by_coin(&self, coin: &str) -> Result<Vec<GuildId>, BotError>;

    // ── Bot instances ──────────────────────────────────────

    /// The bot instance configured for a guild.
    async fn bot_instance(&self, guild_id: GuildId) -> Result<Option<BotInstance>, BotError>;

    /// The bot instance logging in with `token`.
    async fn bot_instance_by_token(&self, token: &str) -> Result<Option<BotInstance>, BotError>;

    /// All configured bot instances.
    async fn list_bot_instances(&self) -> Result<Vec<BotInstance>, BotError>;

    /// Configures (or replaces) a guild's bot instance.
    async fn add_bot_instance(&self, guild_id: GuildId, token: &str) -> Result<(), BotError>;

    /// Removes a guild's bot instance; `false` if none was configured.
    async fn remove_bot_instance(&self, guild_id: GuildId) -> Result<bool, BotError>;

    /// Records the user id of the instance logging in with `token`.
    async fn set_bot_id(&self, token: &str, bot_id: BotId) -> Result<(), BotError>;

    /// Records an instance's display name.
    async fn set_bot_name(&self, guild_id: GuildId, name: &str) -> Result<(), BotError>;

    /// Records an instance's avatar URL.
    async fn set_bot_avatar(&self, guild_id: GuildId, url: &str) -> Result<(), BotError>;

    /// Sets the avatar edit cool-down (epoch seconds).
    async fn set_avatar_timeout(&self, guild_id: GuildId, until: i64) -> Result<(), BotError>;

    /// Sets the name edit cool-down (epoch seconds).
    async fn set_name_timeout(&self, guild_id: GuildId, until: i64) -> Result<(), BotError>;

    /// Records an instance's presence.
    async fn set_activity(&self, guild_id: GuildId, activity: &Activity) -> Result<(), BotError>;

    // ── Webhooks ───────────────────────────────────────────

    /// Cached webhook of a channel.
    async fn webhook(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Option<Webhook>, BotError>;

    /// Caches a webhook, replacing any previous one for the channel.
    async fn add_webhook(&self, webhook: &Webhook) -> Result<(), BotError>;

    /// Drops a cached webhook by URI; `false` if it was not cached.
    async fn delete_webhook(&self, uri: &str) -> Result<bool, BotError>;

    // ── Event counters ─────────────────────────────────────

    /// Records one received event.
    async fn add_event(
        &self,
        kind: AlertKind,
        coin: &str,
        at: DateTime<Utc>,
    ) -> Result<(), BotError>;

    /// Number of `kind` events for `coin` received at or after `since`.
    async fn count_events(
        &self,
        kind: AlertKind,
        coin: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, BotError>;

    /// Deletes events received before `cutoff`, returning how many.
    async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, BotError>;

    // ── Access mappings ────────────────────────────────────

    /// Role mappings of a guild.
    async fn role_mappings(&self, guild_id: GuildId) -> Result<Vec<RoleMapping>, BotError>;

    /// Channel mappings of a guild.
    async fn channel_mappings(&self, guild_id: GuildId) -> Result<Vec<ChannelMapping>, BotError>;

    /// Balance account linked to a member.
    async fn linked_account(&self, member_id: MemberId) -> Result<Option<String>, BotError>;
}
