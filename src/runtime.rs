//! Bootstrap wiring: builds every component, runs the connection-ready
//! lifecycle and serves the ingestion router.
//!
//! ```text
//! Connector ──connect──▶ ready channel ──▶ connection_ready
//!                                             ├─ InstanceRegistry::register
//!                                             ├─ default: start instances + TaskQueue
//!                                             ├─ instance: persist id/name, re-apply activity
//!                                             ├─ Reconciler loop (one per bot)
//!                                             └─ TimerEngine::recover
//!
//! connection_lost ──▶ InstanceRegistry::unregister + stop reconcile loop
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::app_state::AppState;
use crate::config::BotConfig;
use crate::domain::{
    AlertKind, AlertsSettings, BotId, EventBus, GuildId, InstanceRegistry, TaskKind,
};
use crate::error::BotError;
use crate::persistence::{MemoryStore, PostgresStore, Store};
use crate::platform::{BalanceClient, ChatConnection, Connector};
use crate::service::task_queue::ReadySender;
use crate::service::{
    AlertDispatcher, DailyStats, HttpWebhookTransport, Reconciler, TaskHandlers, TaskQueue,
    TimerEngine, WebhookResolver, WebhookTransport,
};
use crate::telemetry;

type ReadyReceiver = mpsc::UnboundedReceiver<Arc<dyn ChatConnection>>;

/// Owns every long-lived component of the bot.
#[derive(Debug)]
pub struct BotRuntime {
    config: BotConfig,
    store: Arc<dyn Store>,
    registry: Arc<InstanceRegistry>,
    events: EventBus,
    timers: TimerEngine,
    dispatcher: Arc<AlertDispatcher>,
    daily_stats: Arc<DailyStats>,
    reconciler: Arc<Reconciler>,
    task_queue: Arc<TaskQueue>,
    connector: Arc<dyn Connector>,
    ready_tx: ReadySender,
    ready_rx: Mutex<Option<ReadyReceiver>>,
    queue_started: AtomicBool,
    reconcile_loops: Mutex<HashMap<BotId, JoinHandle<()>>>,
}

impl BotRuntime {
    /// Wires the components over explicit collaborators.
    #[must_use]
    pub fn new(
        config: BotConfig,
        store: Arc<dyn Store>,
        connector: Arc<dyn Connector>,
        balances: Arc<dyn BalanceClient>,
        transport: Arc<dyn WebhookTransport>,
    ) -> Self {
        let registry = Arc::new(InstanceRegistry::new(Arc::clone(&store)));
        let events = EventBus::new(config.event_bus_capacity);
        let timers = TimerEngine::new(Arc::clone(&store), events.clone());
        let webhooks = WebhookResolver::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            config.webhook_name.clone(),
        );

        let dispatcher = Arc::new(AlertDispatcher::new(
            Arc::clone(&store),
            webhooks.clone(),
            Arc::clone(&transport),
            Arc::clone(&balances),
            events.clone(),
        ));
        let daily_stats = Arc::new(DailyStats::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            webhooks,
            transport,
            Arc::clone(&balances),
            timers.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            balances,
        ));

        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let handlers = Arc::new(TaskHandlers::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&daily_stats),
            Arc::clone(&connector),
            ready_tx.clone(),
        ));
        let task_queue = Arc::new(TaskQueue::new(Arc::clone(&store), handlers));

        Self {
            config,
            store,
            registry,
            events,
            timers,
            dispatcher,
            daily_stats,
            reconciler,
            task_queue,
            connector,
            ready_tx,
            ready_rx: Mutex::new(Some(ready_rx)),
            queue_started: AtomicBool::new(false),
            reconcile_loops: Mutex::new(HashMap::new()),
        }
    }

    /// Opens the configured store and builds the runtime with the HTTP
    /// webhook transport.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the database is unreachable, or
    /// [`BotError::Internal`] if the HTTP client cannot be built.
    pub async fn bootstrap(
        config: BotConfig,
        connector: Arc<dyn Connector>,
        balances: Arc<dyn BalanceClient>,
    ) -> Result<Arc<Self>, BotError> {
        let store = Self::open_store(&config).await?;
        let transport = Arc::new(HttpWebhookTransport::new(config.webhook_timeout())?);
        Ok(Arc::new(Self::new(config, store, connector, balances, transport)))
    }

    /// Process entry point for an embedding binary: loads [`BotConfig`]
    /// from the environment, installs the tracing subscriber, logs the
    /// default bot in and serves the ingestion route until shutdown.
    ///
    /// ```rust,ignore
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     BotRuntime::run(Arc::new(MyConnector::new()), Arc::new(MyBalances::new())).await
    /// }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns the first configuration, telemetry, login or server error.
    pub async fn run(
        connector: Arc<dyn Connector>,
        balances: Arc<dyn BalanceClient>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let config = BotConfig::from_env()?;
        telemetry::init(config.log_format)?;
        tracing::info!(addr = %config.listen_addr, "starting rallybot");

        let runtime = Self::bootstrap(config, connector, balances).await?;
        runtime.start().await?;
        runtime.serve().await?;
        Ok(())
    }

    /// PostgreSQL when persistence is enabled, else the in-memory store.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the database is unreachable or a
    /// migration fails.
    pub async fn open_store(config: &BotConfig) -> Result<Arc<dyn Store>, BotError> {
        if config.persistence_enabled {
            Ok(Arc::new(PostgresStore::connect(config).await?))
        } else {
            tracing::warn!("persistence disabled, state is kept in memory only");
            Ok(Arc::new(MemoryStore::new()))
        }
    }

    /// The instance registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// The store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The alert dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<AlertDispatcher> {
        &self.dispatcher
    }

    /// The reconciler, for manual single-member reconciles.
    #[must_use]
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// The in-process event bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Starts the background listeners and logs the default bot in.
    ///
    /// # Errors
    ///
    /// Returns the platform error of the default bot's login, or any
    /// error of its ready lifecycle.
    pub async fn start(self: &Arc<Self>) -> Result<(), BotError> {
        Arc::clone(&self.daily_stats).spawn_listener().await;
        self.spawn_ready_loop().await;

        let connection = self.connector.connect(&self.config.bot_token).await?;
        self.connection_ready(connection, true).await
    }

    async fn spawn_ready_loop(self: &Arc<Self>) {
        let Some(mut rx) = self.ready_rx.lock().await.take() else {
            tracing::debug!("ready loop already running");
            return;
        };
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(connection) = rx.recv().await {
                let is_default = connection.token() == runtime.config.bot_token;
                let bot_id = connection.user().id;
                if let Err(e) = runtime.connection_ready(connection, is_default).await {
                    tracing::warn!(%bot_id, error = %e, "connection ready lifecycle failed");
                }
            }
        });
    }

    /// Runs the lifecycle of a connection that just became ready. A bot
    /// that reconnects replaces its previous connection and reconcile loop.
    ///
    /// # Errors
    ///
    /// Returns a persistence error from recording the instance or
    /// recovering its timers.
    pub async fn connection_ready(
        &self,
        connection: Arc<dyn ChatConnection>,
        is_default: bool,
    ) -> Result<(), BotError> {
        let user = connection.user();
        self.registry
            .register(user.id, Arc::clone(&connection))
            .await;

        if is_default {
            self.registry.set_default(user.id).await;
            let started = self.start_bot_instances().await?;
            tracing::info!(bot_id = %user.id, instances = started, "default bot ready");
            if !self.queue_started.swap(true, Ordering::SeqCst) {
                Arc::clone(&self.task_queue).spawn(self.config.task_poll_interval());
            }
        } else {
            let token = connection.token();
            self.store.set_bot_id(token, user.id).await?;
            if let Some(instance) = self.store.bot_instance_by_token(token).await? {
                self.store
                    .set_bot_name(instance.guild_id, &user.name)
                    .await?;
                if let Some(activity) = instance.activity {
                    if let Err(e) = self
                        .registry
                        .set_activity(instance.guild_id, user.id, activity)
                        .await
                    {
                        tracing::warn!(bot_id = %user.id, error = %e, "stored activity not applied");
                    }
                }
            }
            tracing::info!(bot_id = %user.id, name = %user.name, "bot instance ready");
        }

        let reconcile =
            Arc::clone(&self.reconciler).spawn(user.id, self.config.reconcile_interval());
        if let Some(previous) = self.reconcile_loops.lock().await.insert(user.id, reconcile) {
            previous.abort();
            tracing::debug!(bot_id = %user.id, "replaced reconcile loop");
        }
        self.timers.recover(user.id).await?;
        Ok(())
    }

    /// Forgets a bot whose connection dropped: removes it from the
    /// registry and stops its reconcile loop. Its timers stay stored and
    /// are recovered on the next [`connection_ready`](Self::connection_ready).
    /// Returns whether the bot was registered.
    pub async fn connection_lost(&self, bot_id: BotId) -> bool {
        if let Some(reconcile) = self.reconcile_loops.lock().await.remove(&bot_id) {
            reconcile.abort();
        }
        let known = self.registry.unregister(bot_id).await.is_some();
        tracing::info!(%bot_id, known, "bot connection lost");
        known
    }

    /// Logs in every stored bot instance; each ready connection goes
    /// through [`connection_ready`](Self::connection_ready). Returns how
    /// many logged in.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the instances cannot be listed.
    pub async fn start_bot_instances(&self) -> Result<usize, BotError> {
        let mut started = 0;
        for instance in self.store.list_bot_instances().await? {
            match self.connector.connect(&instance.bot_token).await {
                Ok(connection) => {
                    if self.ready_tx.send(connection).is_ok() {
                        started += 1;
                    }
                }
                Err(e) => tracing::warn!(
                    guild_id = %instance.guild_id,
                    error = %e,
                    "bot instance failed to log in"
                ),
            }
        }
        Ok(started)
    }

    /// Stores a guild's alert settings and restarts its daily statistics
    /// chains: pending timers are always cancelled, then one start task is
    /// queued per enabled daily-stats instance. Returns how many were
    /// queued.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the settings, timers or tasks cannot
    /// be written.
    pub async fn apply_alerts_settings(
        &self,
        guild_id: GuildId,
        settings: &AlertsSettings,
    ) -> Result<usize, BotError> {
        self.store.set_alerts_settings(guild_id, settings).await?;
        self.timers.cancel_guild(guild_id).await?;

        let instances = settings.enabled_instances(AlertKind::DailyStats);
        for instance in instances {
            self.store
                .add_task(&TaskKind::StartDailyStatsTimers {
                    guild_id,
                    timezone: instance
                        .settings
                        .timezone_offset_hours
                        .clone()
                        .unwrap_or_else(|| Value::from("0")),
                    channel: instance.channel_name.clone(),
                })
                .await?;
        }
        Ok(instances.len())
    }

    /// The ingestion router with tracing and CORS layers.
    pub fn router(&self) -> Router {
        let state = AppState {
            dispatcher: Arc::clone(&self.dispatcher),
            registry: Arc::clone(&self.registry),
        };
        api::build_router()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Serves [`router`](Self::router) on the configured address until
    /// the process stops.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Internal`] if the address cannot be bound or
    /// the server fails.
    pub async fn serve(&self) -> Result<(), BotError> {
        let listener = tokio::net::TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(|e| BotError::Internal(format!("bind {}: {e}", self.config.listen_addr)))?;
        tracing::info!(addr = %self.config.listen_addr, "ingestion route listening");
        axum::serve(listener, self.router())
            .await
            .map_err(|e| BotError::Internal(format!("server: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{
        Activity, ActivityType, AlertInstance, BotId, EventSettings, InstanceSettings, NewTimer,
    };
    use crate::testing::{FakeBalances, FakeConnection, FakeConnector, RecordingTransport};
    use chrono::Utc;
    use serde_json::json;

    fn runtime(connector: Arc<FakeConnector>) -> (Arc<MemoryStore>, Arc<BotRuntime>) {
        let store = Arc::new(MemoryStore::new());
        let config = BotConfig {
            bot_token: "tok-1".into(),
            persistence_enabled: false,
            ..BotConfig::default()
        };
        let runtime = BotRuntime::new(
            config,
            Arc::clone(&store) as Arc<dyn Store>,
            connector,
            Arc::new(FakeBalances::default()),
            Arc::new(RecordingTransport::failing_first(0)),
        );
        (store, Arc::new(runtime))
    }

    async fn wait_for<F, Fut>(mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn start_registers_default_and_instances() {
        let connector = Arc::new(FakeConnector::default());
        connector.add(FakeConnection::new(1, "shared")).await;
        let own = FakeConnection::new(2, "own");
        connector.add(Arc::clone(&own)).await;
        let (store, runtime) = runtime(Arc::clone(&connector));

        let guild = GuildId::new(20);
        let _ = store.add_bot_instance(guild, "tok-2").await;
        let activity = Activity {
            kind: ActivityType::Playing,
            text: "with coins".into(),
        };
        let _ = store.set_activity(guild, &activity).await;

        let Ok(()) = runtime.start().await else {
            panic!("runtime should start");
        };
        assert_eq!(runtime.registry().default_bot_id().await, Some(BotId::new(1)));

        let registry = Arc::clone(runtime.registry());
        assert!(wait_for(|| {
            let registry = Arc::clone(&registry);
            async move { registry.contains(BotId::new(2)).await }
        })
        .await);
        assert!(wait_for(|| {
            let own = Arc::clone(&own);
            async move { own.presence_calls().await == 1 }
        })
        .await);

        let Ok(Some(instance)) = store.bot_instance(guild).await else {
            panic!("instance should exist");
        };
        assert_eq!(instance.bot_id, Some(BotId::new(2)));
        assert_eq!(instance.bot_name.as_deref(), Some("bot-2"));
    }

    #[tokio::test]
    async fn ready_connection_recovers_its_timers() {
        let connector = Arc::new(FakeConnector::default());
        let (store, runtime) = runtime(connector);
        let mut rx = runtime.events().subscribe();
        let _ = store
            .add_timer(&NewTimer {
                guild_id: GuildId::new(10),
                expires_at: Utc::now().timestamp() - 5,
                event: "reminder".into(),
                extras: serde_json::Map::new(),
                bot_id: BotId::new(1),
            })
            .await;

        let conn = FakeConnection::new(1, "shared");
        let Ok(()) = runtime.connection_ready(conn.clone_arc(), true).await else {
            panic!("lifecycle should succeed");
        };
        let Ok(crate::domain::BotEvent::TimerFired { name, .. }) = rx.recv().await else {
            panic!("overdue timer should fire");
        };
        assert_eq!(name, "reminder_timer_over");
    }

    #[tokio::test]
    async fn resaving_daily_stats_restarts_chains() {
        let connector = Arc::new(FakeConnector::default());
        let (store, runtime) = runtime(connector);
        let guild = GuildId::new(10);
        let _ = store
            .add_timer(&NewTimer {
                guild_id: guild,
                expires_at: Utc::now().timestamp() + 3_600,
                event: "daily_stats".into(),
                extras: serde_json::Map::new(),
                bot_id: BotId::new(1),
            })
            .await;

        let mut settings = AlertsSettings::default();
        settings.set(
            AlertKind::DailyStats,
            EventSettings {
                enabled: true,
                instances: vec![AlertInstance {
                    channel_name: "stats".into(),
                    settings: InstanceSettings {
                        timezone_offset_hours: Some(json!("2")),
                        ..InstanceSettings::default()
                    },
                }],
            },
        );

        let queued = runtime.apply_alerts_settings(guild, &settings).await;
        assert!(matches!(queued, Ok(1)));
        assert!(matches!(store.list_timers(BotId::new(1)).await, Ok(t) if t.is_empty()));

        let Ok(tasks) = store.list_tasks().await else {
            panic!("tasks should list");
        };
        let [task] = tasks.as_slice() else {
            panic!("expected one task");
        };
        assert!(matches!(
            task.decode(),
            Ok(TaskKind::StartDailyStatsTimers { channel, .. }) if channel == "stats"
        ));
    }

    #[tokio::test]
    async fn disabling_daily_stats_cancels_the_chain() {
        let connector = Arc::new(FakeConnector::default());
        let (store, runtime) = runtime(connector);
        let guild = GuildId::new(10);
        let _ = store
            .add_timer(&NewTimer {
                guild_id: guild,
                expires_at: Utc::now().timestamp() + 3_600,
                event: "daily_stats".into(),
                extras: serde_json::Map::new(),
                bot_id: BotId::new(1),
            })
            .await;

        let mut settings = AlertsSettings::default();
        settings.set(
            AlertKind::DailyStats,
            EventSettings {
                enabled: false,
                instances: vec![AlertInstance {
                    channel_name: "stats".into(),
                    ..AlertInstance::default()
                }],
            },
        );

        assert!(matches!(runtime.apply_alerts_settings(guild, &settings).await, Ok(0)));
        assert!(matches!(store.list_timers(BotId::new(1)).await, Ok(t) if t.is_empty()));
        assert!(matches!(store.list_tasks().await, Ok(t) if t.is_empty()));
    }

    #[tokio::test]
    async fn reconnect_replaces_the_reconcile_loop() {
        let (_store, runtime) = runtime(Arc::new(FakeConnector::default()));
        let conn = FakeConnection::new(1, "shared");

        let Ok(()) = runtime.connection_ready(conn.clone_arc(), true).await else {
            panic!("lifecycle should succeed");
        };
        let Some(first) = runtime
            .reconcile_loops
            .lock()
            .await
            .get(&BotId::new(1))
            .map(JoinHandle::abort_handle)
        else {
            panic!("reconcile loop should be tracked");
        };

        let Ok(()) = runtime.connection_ready(conn.clone_arc(), true).await else {
            panic!("lifecycle should succeed");
        };
        assert_eq!(runtime.reconcile_loops.lock().await.len(), 1);
        assert!(wait_for(|| {
            let first = first.clone();
            async move { first.is_finished() }
        })
        .await);
    }

    #[tokio::test]
    async fn lost_connection_is_forgotten() {
        let (_store, runtime) = runtime(Arc::new(FakeConnector::default()));
        let conn = FakeConnection::new(1, "shared");
        let Ok(()) = runtime.connection_ready(conn.clone_arc(), true).await else {
            panic!("lifecycle should succeed");
        };

        assert!(runtime.connection_lost(BotId::new(1)).await);
        assert!(!runtime.registry().contains(BotId::new(1)).await);
        assert!(runtime.reconcile_loops.lock().await.is_empty());
        assert!(!runtime.connection_lost(BotId::new(1)).await);
    }

    #[tokio::test]
    async fn router_serves_health() {
        use axum::body::Body;
        use axum::http::{Request, StatusCode};
        use tower::ServiceExt;

        let (_store, runtime) = runtime(Arc::new(FakeConnector::default()));
        let Ok(request) = Request::builder().uri("/health").body(Body::empty()) else {
            panic!("request should build");
        };
        let Ok(response) = runtime.router().oneshot(request).await else {
            panic!("request should be served");
        };
        assert_eq!(response.status(), StatusCode::OK);
    }
}
