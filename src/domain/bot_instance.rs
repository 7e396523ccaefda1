//! Per-guild bot identities and their presence.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{BotId, GuildId};
use crate::error::BotError;

/// A bot identity a guild uses instead of the shared bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotInstance {
    /// Guild that configured the instance.
    pub guild_id: GuildId,
    /// Bot user id; unknown until the instance first connects.
    pub bot_id: Option<BotId>,
    /// Login token.
    pub bot_token: String,
    /// Last applied display name.
    pub bot_name: Option<String>,
    /// Last applied avatar URL.
    pub bot_avatar: Option<String>,
    /// Epoch seconds until avatar edits are allowed again (0 = now).
    pub avatar_timeout: i64,
    /// Epoch seconds until name edits are allowed again (0 = now).
    pub name_timeout: i64,
    /// Persisted presence, if any.
    pub activity: Option<Activity>,
}

impl BotInstance {
    /// A freshly configured instance with only its token known.
    #[must_use]
    pub fn new(guild_id: GuildId, bot_token: impl Into<String>) -> Self {
        Self {
            guild_id,
            bot_id: None,
            bot_token: bot_token.into(),
            bot_name: None,
            bot_avatar: None,
            avatar_timeout: 0,
            name_timeout: 0,
            activity: None,
        }
    }
}

/// Kind of presence shown under the bot's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    /// "Playing ..."
    Playing,
    /// "Listening to ..."
    Listening,
    /// "Competing in ..."
    Competing,
    /// "Watching ..."
    Watching,
}

impl ActivityType {
    /// Stored name of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Playing => "playing",
            Self::Listening => "listening",
            Self::Competing => "competing",
            Self::Watching => "watching",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityType {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "playing" => Ok(Self::Playing),
            "listening" => Ok(Self::Listening),
            "competing" => Ok(Self::Competing),
            "watching" => Ok(Self::Watching),
            other => Err(BotError::ConfigInvalid(format!(
                "unknown activity type `{other}`"
            ))),
        }
    }
}

/// A bot presence: type plus text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Activity {
    /// Presence kind.
    pub kind: ActivityType,
    /// Presence text.
    pub text: String,
}

impl Activity {
    /// Parses a stored `(type, text)` pair.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::ConfigInvalid`] for an unknown type or empty text.
    pub fn parse(kind: &str, text: &str) -> Result<Self, BotError> {
        if text.trim().is_empty() {
            return Err(BotError::ConfigInvalid("empty activity text".into()));
        }
        Ok(Self {
            kind: kind.parse()?,
            text: text.to_string(),
        })
    }
}
