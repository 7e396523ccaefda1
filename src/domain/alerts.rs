//! Per-guild alert configuration.
//!
//! [`AlertsSettings`] maps an event-type name to whether it is enabled and
//! the ordered list of [`AlertInstance`]s (channel + filter + template)
//! configured for it. The dashboard has written these documents with two
//! generations of key names, so the older spellings are accepted as
//! aliases.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::lenient;

/// Event types an alert can be configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Coin purchase.
    Buy,
    /// Donation to the creator.
    Donate,
    /// Transfer between users.
    Transfer,
    /// Conversion from one coin to another.
    Convert,
    /// Redemption of coins.
    Redeem,
    /// Scheduled daily statistics summary (timer driven, never inbound).
    DailyStats,
}

impl AlertKind {
    /// Kinds that arrive as inbound balance-change events.
    pub const EVENTS: [Self; 5] = [
        Self::Buy,
        Self::Donate,
        Self::Transfer,
        Self::Convert,
        Self::Redeem,
    ];

    /// Settings key of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Donate => "donate",
            Self::Transfer => "transfer",
            Self::Convert => "convert",
            Self::Redeem => "redeem",
            Self::DailyStats => "daily_stats",
        }
    }

    /// Parses an inbound event name, case-insensitively.
    ///
    /// `daily_stats` is not an inbound event and yields `None`.
    #[must_use]
    pub fn from_event_name(name: &str) -> Option<Self> {
        let lowered = name.trim().to_ascii_lowercase();
        Self::EVENTS
            .into_iter()
            .find(|kind| kind.as_str() == lowered)
    }

    /// Payload field holding the amount the min/max filter compares.
    #[must_use]
    pub const fn amount_field(self) -> &'static str {
        match self {
            Self::Convert => "fromAmount",
            _ => "amountOfCoin",
        }
    }

    /// `(cents field, derived USD field)` for this kind.
    #[must_use]
    pub const fn usd_fields(self) -> (&'static str, &'static str) {
        match self {
            Self::Convert => ("valueInUSCents", "valueInUSD"),
            Self::Redeem => ("estimatedAmountInUSCents", "estimatedAmountInUSD"),
            _ => ("costInUSCents", "costInUSD"),
        }
    }

    /// Message used when an instance has no custom message.
    #[must_use]
    pub const fn default_description(self) -> &'static str {
        match self {
            Self::Buy => "**{username}** has purchased **{amountOfCoin}** coins of **{coinKind}!**",
            Self::Donate => {
                "**{fromUsername}** has donated **{amountOfCoin}** coins of **{coinKind}!**"
            }
            Self::Transfer => {
                "**{fromUsername}** has transferred **{amountOfCoin}** coins of **{coinKind}!**"
            }
            Self::Convert => {
                "**{username}** has converted **{fromAmount}** coins of **{fromCoinKind}** \
                 to **{toAmount}** coins of **{toCoinKind}!**"
            }
            Self::Redeem => "**{username}** has redeemed **{amountOfCoin}** coins of **{coinKind}!**",
            Self::DailyStats => "Daily stats",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All alert configuration of one guild, keyed by event-type name.
///
/// Unknown keys are kept so a round trip through the bot never drops
/// settings written by a newer dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertsSettings(pub HashMap<String, EventSettings>);

impl AlertsSettings {
    /// Settings for one kind, if configured.
    #[must_use]
    pub fn event(&self, kind: AlertKind) -> Option<&EventSettings> {
        self.0.get(kind.as_str())
    }

    /// Enabled instances for one kind; empty when disabled or absent.
    #[must_use]
    pub fn enabled_instances(&self, kind: AlertKind) -> &[AlertInstance] {
        match self.event(kind) {
            Some(settings) if settings.enabled => &settings.instances,
            _ => &[],
        }
    }

    /// Inserts or replaces the settings of one kind.
    pub fn set(&mut self, kind: AlertKind, settings: EventSettings) {
        self.0.insert(kind.as_str().to_string(), settings);
    }
}

/// Settings of one event type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventSettings {
    /// Master switch for the event type.
    #[serde(default)]
    pub enabled: bool,
    /// Configured destinations, in dashboard order.
    #[serde(default)]
    pub instances: Vec<AlertInstance>,
}

/// One configured (channel, filter, template) destination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertInstance {
    /// Channel name; instances with an empty name are skipped.
    #[serde(default, alias = "channel")]
    pub channel_name: String,
    /// Filter and template overrides.
    #[serde(default)]
    pub settings: InstanceSettings,
}

/// Filter and template overrides of an alert instance.
///
/// Numeric fields stay as raw JSON because the dashboard writes them as
/// numbers or strings; use the accessors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSettings {
    /// Lower bound of the amount filter (inclusive).
    #[serde(default, alias = "minamount", skip_serializing_if = "Option::is_none")]
    pub min_amount: Option<Value>,
    /// Upper bound of the amount filter (inclusive).
    #[serde(default, alias = "maxamount", skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<Value>,
    /// Template replacing the default description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_message: Option<String>,
    /// Title shown as the embed author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_title: Option<String>,
    /// `#rrggbb` embed colour.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_colour: Option<String>,
    /// UTC offset for `daily_stats` instances.
    #[serde(default, alias = "timezone", skip_serializing_if = "Option::is_none")]
    pub timezone_offset_hours: Option<Value>,
}

impl InstanceSettings {
    /// The inclusive amount filter of this instance.
    ///
    /// A missing or unusable minimum is `0`; a missing, unusable or zero
    /// maximum is unbounded.
    #[must_use]
    pub fn amount_range(&self) -> AmountRange {
        let min = self
            .min_amount
            .as_ref()
            .and_then(lenient::as_f64)
            .unwrap_or(0.0);
        let max = self
            .max_amount
            .as_ref()
            .and_then(lenient::as_f64)
            .filter(|max| *max != 0.0)
            .unwrap_or(f64::INFINITY);
        AmountRange { min, max }
    }

    /// Custom message, ignoring blanks.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        non_blank(self.custom_message.as_deref())
    }

    /// Custom title, ignoring blanks.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        non_blank(self.custom_title.as_deref())
    }

    /// Custom colour, ignoring blanks.
    #[must_use]
    pub fn colour(&self) -> Option<&str> {
        non_blank(self.custom_colour.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

/// Inclusive `[min, max]` amount filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmountRange {
    /// Lower bound.
    pub min: f64,
    /// Upper bound, possibly infinite.
    pub max: f64,
}

impl AmountRange {
    /// Returns `true` if `min <= amount <= max`.
    #[must_use]
    pub fn contains(&self, amount: f64) -> bool {
        self.min <= amount && amount <= self.max
    }
}
