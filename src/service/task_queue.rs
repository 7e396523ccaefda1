//! Durable mailbox of deferred one-shot actions.
//!
//! Producers write `{"function", "kwargs"}` records to the store. Every
//! poll cycle lists the pending records, decodes each into a
//! [`TaskKind`], spawns its handler and deletes the record straight away.
//! A handler that fails is logged and never retried: after dequeue a task
//! runs at most once.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::daily_stats::DailyStats;
use crate::domain::{Activity, BotId, GuildId, InstanceRegistry, TaskKind};
use crate::error::{BotError, PlatformError};
use crate::persistence::Store;
use crate::platform::{ChatConnection, Connector};

/// Cool-down applied after the platform rate-limits a profile edit.
pub const PROFILE_EDIT_COOLDOWN_SECS: i64 = 3_600;

/// Connections that finished logging in and wait for the ready lifecycle.
pub type ReadySender = mpsc::UnboundedSender<Arc<dyn ChatConnection>>;

/// Polls the store for tasks and hands them to [`TaskHandlers`].
#[derive(Debug)]
pub struct TaskQueue {
    store: Arc<dyn Store>,
    handlers: Arc<TaskHandlers>,
    run_lock: Mutex<()>,
}

impl TaskQueue {
    /// Creates a queue.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, handlers: Arc<TaskHandlers>) -> Self {
        Self {
            store,
            handlers,
            run_lock: Mutex::new(()),
        }
    }

    /// Runs one poll cycle. Returns the handles of the spawned handlers.
    ///
    /// Records that do not decode are logged and deleted.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the pending tasks cannot be listed.
    pub async fn poll_once(&self) -> Result<Vec<JoinHandle<()>>, BotError> {
        let _cycle = self.run_lock.lock().await;
        let pending = self.store.list_tasks().await?;
        let mut handles = Vec::with_capacity(pending.len());

        for stored in pending {
            match stored.decode() {
                Ok(task) => {
                    let handlers = Arc::clone(&self.handlers);
                    let task_id = stored.id;
                    handles.push(tokio::spawn(async move {
                        let function = task.function_name();
                        match handlers.run(task).await {
                            Ok(()) => tracing::debug!(%task_id, function, "task done"),
                            Err(e) => {
                                let failure = BotError::HandlerFailure(format!("{function}: {e}"));
                                tracing::warn!(%task_id, error = %failure, "task failed");
                            }
                        }
                    }));
                }
                Err(e) => tracing::warn!(task_id = %stored.id, error = %e, "dropping undecodable task"),
            }

            match self.store.delete_task(stored.id).await {
                Ok(true) => {}
                Ok(false) => tracing::debug!(task_id = %stored.id, "task already consumed"),
                Err(e) => tracing::warn!(task_id = %stored.id, error = %e, "task not deleted"),
            }
        }
        Ok(handles)
    }

    /// Polls every `interval` until the runtime shuts down.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.poll_once().await {
                    tracing::warn!(error = %e, "task poll failed");
                }
            }
        })
    }
}

/// The implementation of every [`TaskKind`].
#[derive(Debug)]
pub struct TaskHandlers {
    store: Arc<dyn Store>,
    registry: Arc<InstanceRegistry>,
    daily_stats: Arc<DailyStats>,
    connector: Arc<dyn Connector>,
    ready: ReadySender,
}

impl TaskHandlers {
    /// Creates the handlers. Connections opened by
    /// `start_new_bot_instance` are sent on `ready`.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<InstanceRegistry>,
        daily_stats: Arc<DailyStats>,
        connector: Arc<dyn Connector>,
        ready: ReadySender,
    ) -> Self {
        Self {
            store,
            registry,
            daily_stats,
            connector,
            ready,
        }
    }

    /// Runs one task.
    ///
    /// # Errors
    ///
    /// Returns whatever the handler failed with; the queue logs it.
    pub async fn run(&self, task: TaskKind) -> Result<(), BotError> {
        match task {
            TaskKind::UpdateAvatar {
                guild_id,
                bot_id,
                new_avatar_path,
            } => self.update_avatar(guild_id, bot_id, &new_avatar_path).await,
            TaskKind::UpdateActivity {
                guild_id,
                bot_id,
                activity_type_str,
                activity_text,
            } => {
                let activity = Activity::parse(&activity_type_str, &activity_text)?;
                self.registry
                    .set_activity(guild_id, bot_id, activity)
                    .await
                    .map(|_| ())
            }
            TaskKind::UpdateName {
                guild_id,
                bot_id,
                new_name,
            } => self.update_name(guild_id, bot_id, &new_name).await,
            TaskKind::StartDailyStatsTimers {
                guild_id,
                timezone,
                channel,
            } => self
                .daily_stats
                .start(guild_id, &channel, timezone)
                .await
                .map(|_| ()),
            TaskKind::StartNewBotInstance { bot_token } => self.start_new_bot_instance(&bot_token).await,
            TaskKind::DeleteBotInstance { guild_id } => self.delete_bot_instance(guild_id).await,
        }
    }

    async fn update_avatar(
        &self,
        guild_id: GuildId,
        bot_id: BotId,
        path: &Path,
    ) -> Result<(), BotError> {
        let image = tokio::fs::read(path)
            .await
            .map_err(|e| BotError::HandlerFailure(format!("reading {}: {e}", path.display())))?;
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), error = %e, "avatar temp file not removed");
        }

        let connection = self.registry.connection(bot_id).await?;
        match connection.edit_avatar(&image).await {
            Ok(url) => {
                self.store.set_bot_avatar(guild_id, &url).await?;
                tracing::info!(%guild_id, %bot_id, "avatar updated");
                Ok(())
            }
            Err(e @ PlatformError::RateLimited { .. }) => {
                let until = Utc::now().timestamp() + PROFILE_EDIT_COOLDOWN_SECS;
                self.store.set_avatar_timeout(guild_id, until).await?;
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_name(
        &self,
        guild_id: GuildId,
        bot_id: BotId,
        new_name: &str,
    ) -> Result<(), BotError> {
        let connection = self.registry.connection(bot_id).await?;
        if connection.user().name == new_name {
            tracing::debug!(%bot_id, "name unchanged");
            return Ok(());
        }
        match connection.edit_name(new_name).await {
            Ok(()) => {
                self.store.set_bot_name(guild_id, new_name).await?;
                tracing::info!(%guild_id, %bot_id, "name updated");
                Ok(())
            }
            Err(e @ PlatformError::RateLimited { .. }) => {
                let until = Utc::now().timestamp() + PROFILE_EDIT_COOLDOWN_SECS;
                self.store.set_name_timeout(guild_id, until).await?;
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn start_new_bot_instance(&self, token: &str) -> Result<(), BotError> {
        let connection = self.connector.connect(token).await?;
        tracing::info!(bot_id = %connection.user().id, "bot instance logged in");
        self.ready
            .send(connection)
            .map_err(|_| BotError::Internal("runtime stopped accepting connections".into()))
    }

    async fn delete_bot_instance(&self, guild_id: GuildId) -> Result<(), BotError> {
        let instance = self.store.bot_instance(guild_id).await?;
        self.store.remove_bot_instance(guild_id).await?;

        let Some(bot_id) = instance.and_then(|i| i.bot_id) else {
            tracing::info!(%guild_id, "removed bot instance that never logged in");
            return Ok(());
        };
        if let Some(connection) = self.registry.unregister(bot_id).await {
            connection.close().await;
        }
        tracing::info!(%guild_id, %bot_id, "bot instance stopped");
        Ok(())
    }
}
