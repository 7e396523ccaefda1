//! Database row shapes and conversions for the PostgreSQL store.
//!
//! Platform snowflakes are unsigned 64-bit values; PostgreSQL has no
//! unsigned `BIGINT`, so they are stored bit-for-bit as `i64`.

use serde_json::{Map, Value};

use crate::domain::{Activity, BotId, BotInstance, GuildId, Timer, TimerId};

/// Reinterprets an unsigned snowflake as the `BIGINT` stored for it.
#[must_use]
pub const fn to_db(raw: u64) -> i64 {
    i64::from_ne_bytes(raw.to_ne_bytes())
}

/// Reverses [`to_db`].
#[must_use]
pub const fn from_db(raw: i64) -> u64 {
    u64::from_ne_bytes(raw.to_ne_bytes())
}

/// `timers` row: `(id, guild_id, expires_at, event, extras, bot_id)`.
pub type TimerRow = (i64, i64, i64, String, Value, i64);

/// Builds a [`Timer`] from a `timers` row.
#[must_use]
pub fn timer_from_row((id, guild_id, expires_at, event, extras, bot_id): TimerRow) -> Timer {
    let extras = match extras {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Timer {
        id: TimerId::new(id),
        guild_id: GuildId::new(from_db(guild_id)),
        expires_at,
        event,
        extras,
        bot_id: BotId::new(from_db(bot_id)),
    }
}

/// `bot_instances` row.
pub type BotInstanceRow = (
    i64,
    Option<i64>,
    String,
    Option<String>,
    Option<String>,
    i64,
    i64,
    Option<String>,
    Option<String>,
);

/// Builds a [`BotInstance`] from a `bot_instances` row.
///
/// A stored activity that no longer parses is dropped.
#[must_use]
pub fn bot_instance_from_row(
    (
        guild_id,
        bot_id,
        bot_token,
        bot_name,
        bot_avatar,
        avatar_timeout,
        name_timeout,
        activity_type,
        activity_text,
    ): BotInstanceRow,
) -> BotInstance {
    let activity = match (activity_type, activity_text) {
        (Some(kind), Some(text)) => Activity::parse(&kind, &text).ok(),
        _ => None,
    };
    BotInstance {
        guild_id: GuildId::new(from_db(guild_id)),
        bot_id: bot_id.map(|id| BotId::new(from_db(id))),
        bot_token,
        bot_name,
        bot_avatar,
        avatar_timeout,
        name_timeout,
        activity,
    }
}
