//! Endpoint handlers.

pub mod ingest;
pub mod system;

use axum::Router;

use crate::app_state::AppState;

/// Routes receiving events from the balance service.
pub fn routes() -> Router<AppState> {
    Router::new().merge(ingest::routes())
}
