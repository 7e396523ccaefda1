//! Domain layer: identifiers, records, alert configuration, the instance
//! registry and the in-process event bus.
//!
//! Everything here is independent of the transport: services in
//! [`crate::service`] combine these types with the [`crate::persistence`]
//! store and the [`crate::platform`] seams.

pub mod alerts;
pub mod bot_instance;
pub mod event_bus;
pub mod ids;
pub mod instance_registry;
pub mod lenient;
pub mod mapping;
pub mod payload;
pub mod task;
pub mod timer;

pub use alerts::{AlertInstance, AlertKind, AlertsSettings, AmountRange, EventSettings, InstanceSettings};
pub use bot_instance::{Activity, ActivityType, BotInstance};
pub use event_bus::{BotEvent, EventBus};
pub use ids::{BotId, ChannelId, GuildId, MemberId, TaskId, TimerId};
pub use instance_registry::InstanceRegistry;
pub use mapping::{ChannelMapping, CoinBalance, RoleMapping, Webhook, balance_of};
pub use payload::AlertPayload;
pub use task::{StoredTask, TaskKind};
pub use timer::{DAILY_STATS_EVENT, DailyStatsExtras, NewTimer, Timer};
