//! Persistent timers and the `daily_stats` payload they carry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::lenient;
use super::{BotId, GuildId, TimerId};

/// Event name of the recurring per-guild statistics timer.
pub const DAILY_STATS_EVENT: &str = "daily_stats";

/// Largest accepted distance from UTC, in hours, on either side.
const MIN_OFFSET_HOURS: i64 = -12;
const MAX_OFFSET_HOURS: i64 = 14;

/// A timer that has not been written to the store yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTimer {
    /// Guild the timer belongs to.
    pub guild_id: GuildId,
    /// Fire time as epoch seconds.
    pub expires_at: i64,
    /// Event name; the fired event is `"<event>_timer_over"`.
    pub event: String,
    /// Opaque payload handed to the handler.
    pub extras: Map<String, Value>,
    /// Bot identity whose process re-arms the timer after a restart.
    pub bot_id: BotId,
}

impl NewTimer {
    /// Attaches the store-assigned id.
    #[must_use]
    pub fn with_id(self, id: TimerId) -> Timer {
        Timer {
            id,
            guild_id: self.guild_id,
            expires_at: self.expires_at,
            event: self.event,
            extras: self.extras,
            bot_id: self.bot_id,
        }
    }
}

/// A stored, pending timer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timer {
    /// Store-assigned id; the only handle used to detect cancellation.
    pub id: TimerId,
    /// Guild the timer belongs to.
    pub guild_id: GuildId,
    /// Fire time as epoch seconds.
    pub expires_at: i64,
    /// Event name.
    pub event: String,
    /// Opaque payload handed to the handler.
    pub extras: Map<String, Value>,
    /// Owning bot identity.
    pub bot_id: BotId,
}

impl Timer {
    /// Name of the event dispatched when this timer fires.
    #[must_use]
    pub fn fired_event_name(&self) -> String {
        format!("{}_timer_over", self.event)
    }

    /// Fire time as a UTC timestamp, if representable.
    #[must_use]
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.expires_at, 0)
    }
}

/// The `extras` of a `daily_stats` timer.
///
/// `generation` counts re-arms since the chain was started from the
/// dashboard, so a long-running chain can be checked against the alert
/// instance it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStatsExtras {
    /// Channel the statistics are posted to.
    pub channel_name: String,
    /// UTC offset in hours as configured (number or numeric string).
    #[serde(default)]
    pub timezone: Value,
    /// Re-arm counter, `0` for the first timer of a chain.
    #[serde(default)]
    pub generation: u64,
}

impl DailyStatsExtras {
    /// Reads the extras of a fired timer.
    ///
    /// Returns `None` when `channel_name` is missing.
    #[must_use]
    pub fn from_map(extras: &Map<String, Value>) -> Option<Self> {
        serde_json::from_value(Value::Object(extras.clone())).ok()
    }

    /// Serializes back into a timer payload.
    #[must_use]
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("channel_name".into(), Value::String(self.channel_name.clone()));
        map.insert("timezone".into(), self.timezone.clone());
        map.insert("generation".into(), Value::from(self.generation));
        map
    }

    /// Extras for the next timer in the chain.
    #[must_use]
    pub fn next_generation(&self) -> Self {
        Self {
            generation: self.generation.saturating_add(1),
            ..self.clone()
        }
    }

    /// The configured UTC offset in hours, `None` when it is present but
    /// unusable. A missing offset means UTC.
    #[must_use]
    pub fn offset_hours(&self) -> Option<i64> {
        parse_offset_hours(&self.timezone)
    }
}

/// Parses a UTC offset in hours. `null` and `""` mean `0`; values outside
/// `-12..=14` or non-integers yield `None`.
#[must_use]
pub fn parse_offset_hours(value: &Value) -> Option<i64> {
    match value {
        Value::Null => Some(0),
        Value::String(s) if s.trim().is_empty() => Some(0),
        other => lenient::as_i64(other)
            .filter(|h| (MIN_OFFSET_HOURS..=MAX_OFFSET_HOURS).contains(h)),
    }
}
