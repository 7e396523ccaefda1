//! Service layer: the background execution core.
//!
//! [`TaskQueue`] runs deferred actions, [`TimerEngine`] fires durable
//! timers, [`AlertDispatcher`] fans events out to webhooks,
//! [`DailyStats`] keeps the daily summary chain alive and [`Reconciler`]
//! keeps coin-gated access in step with balances.

pub mod alert_dispatcher;
pub mod daily_stats;
pub mod delivery;
pub mod reconciler;
pub mod task_queue;
pub mod template;
pub mod timer_engine;
pub mod webhooks;

pub use alert_dispatcher::{AlertDispatcher, DispatchReport};
pub use daily_stats::DailyStats;
pub use delivery::{HttpWebhookTransport, WebhookMessage, WebhookTransport};
pub use reconciler::{ReconcileReport, Reconciler};
pub use task_queue::{TaskHandlers, TaskQueue};
pub use timer_engine::{TimerEngine, next_midnight};
pub use webhooks::WebhookResolver;
