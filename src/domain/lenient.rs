//! Lenient coercion of dashboard-supplied JSON values.
//!
//! Settings written by the dashboard store numbers either as JSON numbers
//! or as strings (`"10"`, `"-5"`, `""`). These helpers accept both and
//! report `None` for anything else.

use serde_json::Value;

/// Coerces a number or numeric string to `f64`.
///
/// Empty strings, `null`, booleans, objects and arrays yield `None`.
#[must_use]
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        _ => None,
    }
}

/// Coerces a number or integer string to `i64`.
///
/// Floats with a fractional part are rejected.
#[must_use]
pub fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}
