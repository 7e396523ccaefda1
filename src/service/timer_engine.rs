//! Durable delayed triggers.
//!
//! A timer is a store record plus an in-process waiter task. When the
//! waiter wakes it re-reads the record and deletes it *before* handing it
//! on; the store's delete is the single arbiter of which waiter fires, so
//! a timer fires at most once even when several waiters exist for it
//! (e.g. after a reconnect re-ran recovery).
//!
//! A fired timer goes to the handler registered for its event through
//! [`TimerEngine::route`], over an unbounded channel that never drops it.
//! [`BotEvent::TimerFired`] is also published on the bus for observers,
//! but a lagging bus receiver may miss it.
//!
//! ```text
//! pending ──expires──▶ fired (deleted, event published)
//!    │
//!    └──cancel_guild──▶ cancelled (deleted, waiter finds nothing)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;

use crate::domain::timer::parse_offset_hours;
use crate::domain::{BotEvent, BotId, EventBus, GuildId, NewTimer, Timer, TimerId};
use crate::error::BotError;
use crate::persistence::Store;

const SECONDS_PER_DAY: i64 = 86_400;

type Routes = Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Timer>>>>;

/// Creates, recovers and fires persistent timers.
#[derive(Debug, Clone)]
pub struct TimerEngine {
    store: Arc<dyn Store>,
    events: EventBus,
    routes: Routes,
}

impl TimerEngine {
    /// Creates an engine publishing fired timers on `events`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, events: EventBus) -> Self {
        Self {
            store,
            events,
            routes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registers the handler for timers created with `event` and returns
    /// the receiving end. Every timer of that event fired afterwards is
    /// delivered on it. Registering the same event again replaces the
    /// previous route.
    pub async fn route(&self, event: &str) -> mpsc::UnboundedReceiver<Timer> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self
            .routes
            .write()
            .await
            .insert(event.to_string(), tx)
            .is_some()
        {
            tracing::debug!(event, "timer route replaced");
        }
        rx
    }

    /// Persists a timer and starts waiting for it.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the timer cannot be stored; no
    /// waiter is started in that case.
    pub async fn create(&self, timer: NewTimer) -> Result<TimerId, BotError> {
        let id = self.store.add_timer(&timer).await?;
        let timer = timer.with_id(id);
        tracing::debug!(
            timer_id = %id,
            guild_id = %timer.guild_id,
            event = %timer.event,
            expires_at = timer.expires_at,
            "timer created"
        );
        self.spawn_waiter(timer);
        Ok(id)
    }

    /// Starts a waiter task for an already persisted timer.
    ///
    /// The handle resolves to `true` if this waiter fired the timer.
    pub fn spawn_waiter(&self, timer: Timer) -> JoinHandle<bool> {
        let engine = self.clone();
        tokio::spawn(async move { engine.wait_and_fire(timer).await })
    }

    /// Sleeps until the timer is due, then fires it unless it was deleted
    /// in the meantime. Returns whether this call fired it.
    pub async fn wait_and_fire(&self, timer: Timer) -> bool {
        let remaining = timer.expires_at.saturating_sub(Utc::now().timestamp());
        if remaining > 0 {
            tokio::time::sleep(Duration::from_secs(remaining.unsigned_abs())).await;
        }

        match self.fire(timer.id).await {
            Ok(fired) => fired,
            Err(e) => {
                tracing::warn!(timer_id = %timer.id, error = %e, "timer could not be fired");
                false
            }
        }
    }

    async fn fire(&self, id: TimerId) -> Result<bool, BotError> {
        let Some(timer) = self.store.get_timer(id).await? else {
            tracing::debug!(timer_id = %id, "timer gone before expiry");
            return Ok(false);
        };
        if !self.store.delete_timer(id).await? {
            tracing::debug!(timer_id = %id, "timer already fired by another waiter");
            return Ok(false);
        }

        let name = timer.fired_event_name();
        tracing::info!(timer_id = %id, guild_id = %timer.guild_id, event = %name, "timer fired");

        if let Some(route) = self.routes.read().await.get(&timer.event) {
            if route.send(timer.clone()).is_err() {
                tracing::warn!(timer_id = %id, event = %timer.event, "timer handler is gone");
            }
        }
        self.events.publish(BotEvent::TimerFired { name, timer });
        Ok(true)
    }

    /// Starts waiters for every timer owned by `bot_id`. Overdue timers
    /// fire immediately. Returns how many waiters were started.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the timers cannot be listed.
    pub async fn recover(&self, bot_id: BotId) -> Result<usize, BotError> {
        let timers = self.store.list_timers(bot_id).await?;
        let count = timers.len();
        for timer in timers {
            self.spawn_waiter(timer);
        }
        tracing::info!(%bot_id, count, "recovered timers");
        Ok(count)
    }

    /// Deletes every pending timer of a guild. A waiter that already
    /// re-read its record is not stopped.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the timers cannot be deleted.
    pub async fn cancel_guild(&self, guild_id: GuildId) -> Result<u64, BotError> {
        let removed = self.store.delete_guild_timers(guild_id).await?;
        tracing::info!(%guild_id, removed, "cancelled guild timers");
        Ok(removed)
    }
}

/// Epoch second of the next local midnight for a UTC offset.
///
/// Always strictly after `now`; if the arithmetic ever lands on or before
/// `now` the result is `now + 24h`.
#[must_use]
pub fn next_midnight(now: i64, offset_hours: i64) -> i64 {
    let local = now.saturating_add(offset_hours.saturating_mul(3_600));
    let until_midnight = SECONDS_PER_DAY - local.rem_euclid(SECONDS_PER_DAY);
    let candidate = now.saturating_add(until_midnight);
    if candidate > now {
        candidate
    } else {
        now.saturating_add(SECONDS_PER_DAY)
    }
}

/// [`next_midnight`] for a stored timezone value. An invalid offset is
/// logged and treated as UTC.
#[must_use]
pub fn resolve_expiry(now: i64, timezone: &Value) -> i64 {
    let offset = parse_offset_hours(timezone).unwrap_or_else(|| {
        let err = BotError::ConfigInvalid(format!("timezone offset {timezone}"));
        tracing::warn!(error = %err, "using UTC instead");
        0
    });
    next_midnight(now, offset)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::DAILY_STATS_EVENT;
    use crate::persistence::MemoryStore;
    use serde_json::json;

    fn engine() -> (Arc<MemoryStore>, EventBus, TimerEngine) {
        let store = Arc::new(MemoryStore::new());
        let events = EventBus::new(64);
        let engine = TimerEngine::new(Arc::clone(&store) as Arc<dyn Store>, events.clone());
        (store, events, engine)
    }

    fn new_timer(expires_at: i64) -> NewTimer {
        NewTimer {
            guild_id: GuildId::new(10),
            expires_at,
            event: DAILY_STATS_EVENT.into(),
            extras: serde_json::Map::new(),
            bot_id: BotId::new(1),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_waiters_fire_once() {
        let (store, events, engine) = engine();
        let mut rx = events.subscribe();
        let timer = new_timer(Utc::now().timestamp() - 1);
        let id = tokio_test::assert_ok!(store.add_timer(&timer).await);
        let timer = timer.with_id(id);

        let handles: Vec<_> = (0..8)
            .map(|_| engine.spawn_waiter(timer.clone()))
            .collect();
        let mut fired = 0;
        for handle in handles {
            if matches!(handle.await, Ok(true)) {
                fired += 1;
            }
        }

        assert_eq!(fired, 1);
        assert!(matches!(rx.try_recv(), Ok(BotEvent::TimerFired { .. })));
        assert!(rx.try_recv().is_err());
        assert!(matches!(store.get_timer(id).await, Ok(None)));
    }

    #[tokio::test(start_paused = true)]
    async fn future_timer_fires_after_its_delay() {
        let (_store, events, engine) = engine();
        let mut rx = events.subscribe();
        let expires_at = Utc::now().timestamp() + 3_600;
        let _ = tokio_test::assert_ok!(engine.create(new_timer(expires_at)).await);

        let Ok(BotEvent::TimerFired { name, timer }) = rx.recv().await else {
            panic!("timer should fire");
        };
        assert_eq!(name, "daily_stats_timer_over");
        assert_eq!(timer.expires_at, expires_at);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (store, events, engine) = engine();
        let mut rx = events.subscribe();
        let timer = new_timer(Utc::now().timestamp() + 60);
        let id = tokio_test::assert_ok!(store.add_timer(&timer).await);
        let handle = engine.spawn_waiter(timer.with_id(id));

        assert!(matches!(engine.cancel_guild(GuildId::new(10)).await, Ok(1)));
        assert!(matches!(handle.await, Ok(false)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn routed_timers_survive_a_flooded_bus() {
        let store = Arc::new(MemoryStore::new());
        let events = EventBus::new(1);
        let engine = TimerEngine::new(Arc::clone(&store) as Arc<dyn Store>, events.clone());
        let mut routed = engine.route(DAILY_STATS_EVENT).await;
        let mut lagging = events.subscribe();

        let timer = new_timer(Utc::now().timestamp() - 1);
        let id = tokio_test::assert_ok!(store.add_timer(&timer).await);
        assert!(engine.wait_and_fire(timer.with_id(id)).await);
        for _ in 0..8 {
            events.publish(BotEvent::AlertDelivered {
                guild_id: GuildId::new(10),
                kind: crate::domain::AlertKind::Buy,
                channel: "alerts".into(),
            });
        }

        assert!(matches!(
            lagging.recv().await,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_))
        ));
        let Some(fired) = routed.recv().await else {
            panic!("routed timer should be delivered");
        };
        assert_eq!(fired.id, id);
    }

    #[tokio::test]
    async fn timers_of_other_events_are_not_routed() {
        let (store, _events, engine) = engine();
        let mut routed = engine.route(DAILY_STATS_EVENT).await;
        let mut other = new_timer(Utc::now().timestamp() - 1);
        other.event = "giveaway".into();
        let id = tokio_test::assert_ok!(store.add_timer(&other).await);

        assert!(engine.wait_and_fire(other.with_id(id)).await);
        assert!(routed.try_recv().is_err());
    }

    #[tokio::test]
    async fn recover_starts_a_waiter_per_timer() {
        let (store, events, engine) = engine();
        let mut rx = events.subscribe();
        let past = Utc::now().timestamp() - 10;
        let _ = store.add_timer(&new_timer(past)).await;
        let _ = store.add_timer(&new_timer(past)).await;
        let mut other = new_timer(past);
        other.bot_id = BotId::new(2);
        let _ = store.add_timer(&other).await;

        assert!(matches!(engine.recover(BotId::new(1)).await, Ok(2)));
        for _ in 0..2 {
            assert!(matches!(rx.recv().await, Ok(BotEvent::TimerFired { .. })));
        }
        assert!(matches!(store.list_timers(BotId::new(2)).await, Ok(t) if t.len() == 1));
    }

    #[test]
    fn next_midnight_is_strictly_future() {
        // 2024-03-01T00:00:00Z
        let midnight = 1_709_251_200;
        assert_eq!(next_midnight(midnight, 0), midnight + SECONDS_PER_DAY);
        assert_eq!(next_midnight(midnight - 1, 0), midnight);
        assert_eq!(next_midnight(midnight + 3_600, 0), midnight + SECONDS_PER_DAY);
        for offset in -12..=14 {
            for now in [midnight, midnight + 1, midnight + 43_200, midnight + 86_399] {
                let next = next_midnight(now, offset);
                assert!(next > now);
                assert!(next - now <= SECONDS_PER_DAY);
            }
        }
    }

    #[test]
    fn offsets_shift_local_midnight() {
        let midnight = 1_709_251_200;
        // 22:00 UTC is midnight at UTC+2.
        assert_eq!(next_midnight(midnight - 2 * 3_600 - 1, 2), midnight - 2 * 3_600);
        assert_eq!(next_midnight(midnight, -5), midnight + 5 * 3_600);
    }

    #[test]
    fn invalid_timezone_falls_back_to_utc() {
        let midnight = 1_709_251_200;
        assert_eq!(resolve_expiry(midnight + 10, &json!("bogus")), midnight + SECONDS_PER_DAY);
        assert_eq!(resolve_expiry(midnight + 10, &json!(99)), midnight + SECONDS_PER_DAY);
        assert_eq!(resolve_expiry(midnight + 10, &json!("3")), midnight + SECONDS_PER_DAY - 3 * 3_600);
    }
}
