//! Rendering of alert messages from payloads and instance settings.
//!
//! A message template is free text with `{identifier}` tokens. Tokens are
//! looked up in the flattened payload: top-level payload fields, then every
//! `data.*` field lifted to the top level, then the derived USD amounts.
//! A token with no value is left in the text as written.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use super::delivery::{DEFAULT_COLOUR, Embed, EmbedAuthor, WebhookMessage};
use crate::domain::{AlertKind, AlertPayload, InstanceSettings, lenient};

/// Title used when an instance has no custom title.
pub const DEFAULT_TITLE: &str = "Alert!";

/// Name shown instead of the sender when they hid it.
pub const ANONYMOUS: &str = "someone";

static TOKEN: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\{(\w+)\}").ok());

/// Renders the webhook message for one alert instance.
#[must_use]
pub fn render_alert(
    kind: AlertKind,
    payload: &AlertPayload,
    settings: &InstanceSettings,
    icon_url: &str,
) -> WebhookMessage {
    let template = settings
        .message()
        .unwrap_or(kind.default_description());
    let title = settings.title().unwrap_or(DEFAULT_TITLE);
    let color = settings.colour().map_or(DEFAULT_COLOUR, parse_colour);

    let values = flatten(kind, payload);
    WebhookMessage::single(Embed {
        description: substitute(template, &values),
        color,
        author: EmbedAuthor {
            name: title.to_string(),
            icon_url: icon_url.to_string(),
        },
        timestamp: payload.created_date().map(str::to_string),
    })
}

/// Builds the token lookup table for a payload.
#[must_use]
pub fn flatten(kind: AlertKind, payload: &AlertPayload) -> Map<String, Value> {
    let mut values = payload.extra.clone();
    values.insert("event".into(), Value::String(payload.event.clone()));
    values.insert("coinKind".into(), Value::String(payload.coin_kind.clone()));
    for (key, value) in &payload.data {
        values.insert(key.clone(), value.clone());
    }

    if !payload.show_username() {
        for field in ["username", "fromUsername"] {
            values.insert(field.into(), Value::String(ANONYMOUS.into()));
        }
    }

    let (cents_field, usd_field) = kind.usd_fields();
    if let Some(usd) = values.get(cents_field).and_then(cents_to_dollars) {
        values.insert(usd_field.into(), usd);
    }
    values
}

/// Whole dollars from a cents value, rounded towards negative infinity.
fn cents_to_dollars(cents: &Value) -> Option<Value> {
    if let Some(whole) = lenient::as_i64(cents) {
        return Some(Value::from(whole.div_euclid(100)));
    }
    lenient::as_f64(cents)
        .map(|c| (c / 100.0).floor())
        .filter(|d| d.is_finite())
        .map(Value::from)
}

/// Replaces every `{identifier}` token that has a value in `values`.
#[must_use]
pub fn substitute(template: &str, values: &Map<String, Value>) -> String {
    let Some(token) = TOKEN.as_ref() else {
        return template.to_string();
    };
    token
        .replace_all(template, |caps: &Captures<'_>| {
            let whole = caps.get(0).map_or("", |m| m.as_str());
            caps.get(1)
                .and_then(|name| values.get(name.as_str()))
                .and_then(display_value)
                .unwrap_or_else(|| whole.to_string())
        })
        .into_owned()
}

fn display_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Parses `#rrggbb` / `0xrrggbb` / `rrggbb`, falling back to the default
/// colour.
#[must_use]
pub fn parse_colour(raw: &str) -> u32 {
    let trimmed = raw.trim();
    let hex = trimmed
        .strip_prefix('#')
        .or_else(|| trimmed.strip_prefix("0x"))
        .unwrap_or(trimmed);
    u32::from_str_radix(hex, 16)
        .ok()
        .filter(|c| *c <= 0x00ff_ffff)
        .unwrap_or(DEFAULT_COLOUR)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(raw: Value) -> AlertPayload {
        let Ok(payload) = serde_json::from_value::<AlertPayload>(raw) else {
            panic!("payload should parse");
        };
        payload
    }

    fn buy(show_username: bool) -> AlertPayload {
        payload(json!({
            "event": "buy",
            "coinKind": "STANZ",
            "data": {
                "username": "Ann",
                "amountOfCoin": 50,
                "costInUSCents": 1999,
                "showUsername": show_username,
                "createdDate": "2024-03-01T12:00:00Z"
            }
        }))
    }

    #[test]
    fn unknown_tokens_are_left_verbatim() {
        let values = flatten(AlertKind::Buy, &buy(true));
        let text = substitute("{username} bought {amountOfCoin} via {nonsense}", &values);
        assert_eq!(text, "Ann bought 50 via {nonsense}");
    }

    #[test]
    fn hidden_username_becomes_someone() {
        let values = flatten(AlertKind::Buy, &buy(false));
        assert_eq!(substitute("{username}", &values), "someone");
        assert_eq!(substitute("{fromUsername}", &values), "someone");
    }

    #[test]
    fn usd_is_floor_of_cents() {
        let values = flatten(AlertKind::Buy, &buy(true));
        assert_eq!(values.get("costInUSD"), Some(&json!(19)));

        let redeem = payload(json!({
            "event": "redeem",
            "coinKind": "STANZ",
            "data": {"amountOfCoin": 1, "estimatedAmountInUSCents": "250"}
        }));
        let values = flatten(AlertKind::Redeem, &redeem);
        assert_eq!(values.get("estimatedAmountInUSD"), Some(&json!(2)));
    }

    #[test]
    fn default_template_and_styling() {
        let message = render_alert(
            AlertKind::Buy,
            &buy(true),
            &InstanceSettings::default(),
            "https://img/stanz.png",
        );
        let [embed] = message.embeds.as_slice() else {
            panic!("expected exactly one embed");
        };
        assert!(embed.description.contains("Ann"));
        assert!(embed.description.contains("50"));
        assert!(embed.description.contains("STANZ"));
        assert_eq!(embed.author.name, DEFAULT_TITLE);
        assert_eq!(embed.color, DEFAULT_COLOUR);
        assert_eq!(embed.timestamp.as_deref(), Some("2024-03-01T12:00:00Z"));
    }

    #[test]
    fn custom_settings_override_defaults() {
        let settings = InstanceSettings {
            custom_message: Some("{coinKind} to the moon, ${costInUSD}".into()),
            custom_title: Some("Whale".into()),
            custom_colour: Some("#00ff00".into()),
            ..InstanceSettings::default()
        };
        let message = render_alert(AlertKind::Buy, &buy(true), &settings, "");
        let [embed] = message.embeds.as_slice() else {
            panic!("expected exactly one embed");
        };
        assert_eq!(embed.description, "STANZ to the moon, $19");
        assert_eq!(embed.author.name, "Whale");
        assert_eq!(embed.color, 0x00ff00);
    }

    #[test]
    fn colours_parse_leniently() {
        assert_eq!(parse_colour("#ABCDEF"), 0xabcdef);
        assert_eq!(parse_colour("0x123456"), 0x123456);
        assert_eq!(parse_colour("red"), DEFAULT_COLOUR);
        assert_eq!(parse_colour("#1234567"), DEFAULT_COLOUR);
    }
}
