//! System endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::app_state::AppState;
use crate::domain::BotId;

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    timestamp: String,
    connected_bots: Vec<BotId>,
    default_bot: Option<BotId>,
}

/// `GET /health`: Liveness plus the bot identities currently connected.
///
/// Reports `degraded` while the default bot is not connected, since
/// alerts for guilds without their own instance cannot be delivered.
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let default_bot = state.registry.default_bot_id().await;
    let status = if default_bot.is_some() {
        "healthy"
    } else {
        "degraded"
    };
    (
        StatusCode::OK,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            timestamp: Utc::now().to_rfc3339(),
            connected_bots: state.registry.bot_ids().await,
            default_bot,
        }),
    )
}

/// System routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}
