//! Inbound balance-change events.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use tracing::Instrument;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::domain::AlertPayload;
use crate::error::BotError;

/// `POST /mappings/webhooks/{event}`: Fan an event out to the configured alert
/// channels and report what happened.
///
/// The path names the event; a body that carries a different `event`
/// is rejected.
///
/// # Errors
///
/// Returns [`BotError::InvalidPayload`] for unknown or conflicting event
/// names and a persistence error if the event cannot be recorded.
pub async fn ingest_event(
    State(state): State<AppState>,
    Path(event): Path<String>,
    Json(mut payload): Json<AlertPayload>,
) -> Result<impl IntoResponse, BotError> {
    if payload.event.trim().is_empty() {
        payload.event = event;
    } else if !payload.event.eq_ignore_ascii_case(&event) {
        return Err(BotError::InvalidPayload(format!(
            "path event `{event}` does not match body event `{}`",
            payload.event
        )));
    }

    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("ingest", %request_id, event = %payload.event);
    let report = state
        .dispatcher
        .process_payload(&payload)
        .instrument(span)
        .await?;

    Ok((StatusCode::OK, Json(report)))
}

/// Ingestion routes. `/mappings/webhooks/{event}` is where the balance
/// service posts; `/webhooks/{event}` is kept as a shorter alias.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/mappings/webhooks/{event}", post(ingest_event))
        .route("/webhooks/{event}", post(ingest_event))
}
