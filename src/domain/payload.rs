//! Inbound balance-change event payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::AlertKind;
use super::lenient;
use crate::error::BotError;

/// A balance-change event as posted by the balance service.
///
/// `data` stays untyped: templates may reference any of its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    /// Event type name (`buy`, `donate`, ...).
    #[serde(default)]
    pub event: String,
    /// Coin the event is about.
    #[serde(rename = "coinKind")]
    pub coin_kind: String,
    /// Event-specific fields.
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Any other top-level fields, kept for templates.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AlertPayload {
    /// The event kind.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::InvalidPayload`] for unknown event names.
    pub fn kind(&self) -> Result<AlertKind, BotError> {
        AlertKind::from_event_name(&self.event)
            .ok_or_else(|| BotError::InvalidPayload(format!("unknown event `{}`", self.event)))
    }

    /// The amount the min/max filter compares for `kind`.
    #[must_use]
    pub fn amount(&self, kind: AlertKind) -> Option<f64> {
        self.data.get(kind.amount_field()).and_then(lenient::as_f64)
    }

    /// Whether the sender agreed to show their name.
    #[must_use]
    pub fn show_username(&self) -> bool {
        matches!(self.data.get("showUsername"), Some(Value::Bool(true)))
    }

    /// `data.createdDate`, if present.
    #[must_use]
    pub fn created_date(&self) -> Option<&str> {
        self.data.get("createdDate").and_then(Value::as_str)
    }
}
