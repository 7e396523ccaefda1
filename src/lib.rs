//! # rallybot
//!
//! Background core of a coin-gated community chat bot.
//!
//! The bot posts alerts when creator-coin balances change, posts a daily
//! statistics summary per guild, grants and revokes roles and channel
//! access from holders' balances, and runs deferred profile and instance
//! management tasks. Chat platform sessions and the balance service are
//! external; they are reached through the traits in [`platform`].
//!
//! ## Architecture
//!
//! ```text
//! Balance service ──POST /mappings/webhooks/{event}──┐
//!                                                     │
//!     ├── Ingest handler (api/)                       │
//!     ├── AlertDispatcher (service/) ◀────────────────┘
//!     │
//!     ├── TaskQueue ── TaskHandlers (service/)
//!     ├── TimerEngine ── route ── DailyStats (service/)
//!     ├── EventBus (domain/, notifications)
//!     ├── Reconciler (service/)
//!     │
//!     ├── InstanceRegistry (domain/)
//!     ├── ChatConnection / Connector (platform)
//!     │
//!     └── Store: PostgreSQL or in-memory (persistence/)
//! ```
//!
//! [`runtime::BotRuntime`] wires everything and drives the
//! connection-ready lifecycle.

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod platform;
pub mod runtime;
pub mod service;
pub mod telemetry;

#[cfg(test)]
mod testing;
