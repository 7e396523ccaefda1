//! Broadcast channel for in-process bot events.
//!
//! [`EventBus`] wraps a [`tokio::sync::broadcast`] channel. It carries
//! notifications: a [`BotEvent::TimerFired`] for every fired timer and a
//! [`BotEvent::AlertDelivered`] for every delivered alert. Slow receivers
//! may miss events, so timer handlers get their timers from
//! `TimerEngine::route` instead.

use tokio::sync::broadcast;

use super::{AlertKind, GuildId, Timer};

/// Event published on the [`EventBus`].
#[derive(Debug, Clone)]
pub enum BotEvent {
    /// A timer fired. Its record was deleted from the store before this
    /// event was published.
    TimerFired {
        /// `"<event>_timer_over"`.
        name: String,
        /// The full timer record.
        timer: Timer,
    },

    /// An alert message was delivered to a webhook.
    AlertDelivered {
        /// Guild the alert was posted to.
        guild_id: GuildId,
        /// Event type of the alert.
        kind: AlertKind,
        /// Channel name of the alert instance.
        channel: String,
    },
}

/// Broadcast bus for [`BotEvent`]s.
///
/// When the ring buffer is full, the oldest events are dropped for
/// lagging receivers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BotEvent>,
}

impl EventBus {
    /// Creates a new `EventBus` with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of receivers that received the event.
    /// If there are no active receivers, the event is silently dropped.
    pub fn publish(&self, event: BotEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Creates a new receiver that will receive all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.sender.subscribe()
    }
}
