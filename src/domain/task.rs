//! Deferred one-shot actions consumed by the task queue.
//!
//! Producers (the dashboard back-end) write `{"function": ..., "kwargs":
//! {...}}` records to the store. [`TaskKind`] is the closed set of
//! functions the queue knows how to run; a record naming anything else
//! fails to decode instead of being looked up by name at runtime.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{BotId, GuildId, TaskId};
use crate::error::BotError;

/// One deferred action with its typed arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "function", content = "kwargs", rename_all = "snake_case")]
pub enum TaskKind {
    /// Replace a bot instance's avatar with the image in a temp file.
    UpdateAvatar {
        /// Guild owning the bot instance.
        guild_id: GuildId,
        /// Bot whose avatar changes.
        bot_id: BotId,
        /// Temp file holding the new image; removed after reading.
        new_avatar_path: PathBuf,
    },

    /// Change a bot instance's presence.
    UpdateActivity {
        /// Guild owning the bot instance.
        guild_id: GuildId,
        /// Bot whose presence changes.
        bot_id: BotId,
        /// One of `playing`, `listening`, `competing`, `watching`.
        activity_type_str: String,
        /// Presence text.
        activity_text: String,
    },

    /// Rename a bot instance.
    UpdateName {
        /// Guild owning the bot instance.
        guild_id: GuildId,
        /// Bot to rename.
        bot_id: BotId,
        /// New display name.
        new_name: String,
    },

    /// Arm the first `daily_stats` timer for one alert instance.
    StartDailyStatsTimers {
        /// Guild the statistics are posted to.
        guild_id: GuildId,
        /// UTC offset in hours, as a number or numeric string.
        #[serde(default)]
        timezone: serde_json::Value,
        /// Channel name the statistics are posted to.
        channel: String,
    },

    /// Log in a newly configured per-guild bot.
    StartNewBotInstance {
        /// Login token of the new bot.
        bot_token: String,
    },

    /// Stop and forget a guild's bot instance.
    DeleteBotInstance {
        /// Guild whose instance is removed.
        guild_id: GuildId,
    },
}

impl TaskKind {
    /// The `function` name this kind is stored under.
    #[must_use]
    pub const fn function_name(&self) -> &'static str {
        match self {
            Self::UpdateAvatar { .. } => "update_avatar",
            Self::UpdateActivity { .. } => "update_activity",
            Self::UpdateName { .. } => "update_name",
            Self::StartDailyStatsTimers { .. } => "start_daily_stats_timers",
            Self::StartNewBotInstance { .. } => "start_new_bot_instance",
            Self::DeleteBotInstance { .. } => "delete_bot_instance",
        }
    }
}

/// A task record as it sits in the store, not yet decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTask {
    /// Store-assigned id.
    pub id: TaskId,
    /// Raw `{"function", "kwargs"}` body.
    pub body: serde_json::Value,
}

impl StoredTask {
    /// Decodes the body into a [`TaskKind`].
    ///
    /// # Errors
    ///
    /// Returns [`BotError::HandlerFailure`] when the function name is not
    /// a known kind or its arguments do not match.
    pub fn decode(&self) -> Result<TaskKind, BotError> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| BotError::HandlerFailure(format!("task {}: {e}", self.id)))
    }
}
