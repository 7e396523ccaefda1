//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::domain::InstanceRegistry;
use crate::service::AlertDispatcher;

/// State handed to every handler through Axum's `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Dispatcher receiving ingested events.
    pub dispatcher: Arc<AlertDispatcher>,
    /// Live bot connections, reported by the health check.
    pub registry: Arc<InstanceRegistry>,
}
