//! Process-wide table of live bot connections.
//!
//! [`InstanceRegistry`] maps every logged-in bot identity to its
//! [`ChatConnection`] and remembers the presence last applied through it,
//! so repeated activity updates with the same content cost no remote call.
//! The table is a process-local cache; it is rebuilt on every start as
//! connections become ready.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{Activity, BotId, GuildId};
use crate::error::BotError;
use crate::persistence::Store;
use crate::platform::ChatConnection;

#[derive(Debug)]
struct BotEntry {
    connection: Arc<dyn ChatConnection>,
    activity: Option<Activity>,
}

/// Live connections keyed by bot identity, plus the shared default bot.
///
/// # Concurrency
///
/// The map sits behind a [`tokio::sync::RwLock`]; lookups run
/// concurrently and registrations are last-writer-wins.
#[derive(Debug)]
pub struct InstanceRegistry {
    store: Arc<dyn Store>,
    bots: RwLock<HashMap<BotId, BotEntry>>,
    default_bot: RwLock<Option<BotId>>,
}

impl InstanceRegistry {
    /// Creates an empty registry backed by `store` for instance lookups.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            bots: RwLock::new(HashMap::new()),
            default_bot: RwLock::new(None),
        }
    }

    /// Registers a ready connection, replacing any previous one for the
    /// same identity. The cached activity is reset.
    pub async fn register(&self, bot_id: BotId, connection: Arc<dyn ChatConnection>) {
        let previous = self.bots.write().await.insert(
            bot_id,
            BotEntry {
                connection,
                activity: None,
            },
        );
        if previous.is_some() {
            tracing::debug!(%bot_id, "replaced connection on reconnect");
        } else {
            tracing::debug!(%bot_id, "registered connection");
        }
    }

    /// Removes a connection, returning it so the caller can close it.
    pub async fn unregister(&self, bot_id: BotId) -> Option<Arc<dyn ChatConnection>> {
        let removed = self.bots.write().await.remove(&bot_id);
        let mut default_bot = self.default_bot.write().await;
        if *default_bot == Some(bot_id) {
            *default_bot = None;
        }
        removed.map(|entry| entry.connection)
    }

    /// Marks the shared bot identity.
    pub async fn set_default(&self, bot_id: BotId) {
        *self.default_bot.write().await = Some(bot_id);
    }

    /// The shared bot identity, if one has become ready.
    pub async fn default_bot_id(&self) -> Option<BotId> {
        *self.default_bot.read().await
    }

    /// Whether `bot_id` has a live connection.
    pub async fn contains(&self, bot_id: BotId) -> bool {
        self.bots.read().await.contains_key(&bot_id)
    }

    /// The live connection of a bot identity.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::NotConnected`] if the identity is not
    /// registered.
    pub async fn connection(&self, bot_id: BotId) -> Result<Arc<dyn ChatConnection>, BotError> {
        self.bots
            .read()
            .await
            .get(&bot_id)
            .map(|entry| Arc::clone(&entry.connection))
            .ok_or_else(|| BotError::NotConnected(format!("bot {bot_id} is not connected")))
    }

    /// The default connection.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::NotConnected`] if no default bot is ready.
    pub async fn default_connection(&self) -> Result<Arc<dyn ChatConnection>, BotError> {
        match self.default_bot_id().await {
            Some(bot_id) => self.connection(bot_id).await,
            None => Err(BotError::NotConnected("default bot is not ready".into())),
        }
    }

    /// The connection that acts for a guild.
    ///
    /// A guild with its own bot instance is served only by that instance;
    /// every other guild is served by the default bot.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::NotConnected`] if the responsible bot is not
    /// (yet) connected, or a persistence error from the instance lookup.
    pub async fn resolve(&self, guild_id: GuildId) -> Result<Arc<dyn ChatConnection>, BotError> {
        match self.store.bot_instance(guild_id).await? {
            Some(instance) => match instance.bot_id {
                Some(bot_id) => self.connection(bot_id).await,
                None => Err(BotError::NotConnected(format!(
                    "bot instance of guild {guild_id} has not logged in"
                ))),
            },
            None => self.default_connection().await,
        }
    }

    /// Applies a presence to `bot_id` unless it is already showing it.
    ///
    /// On change the activity is pushed through the connection, cached,
    /// and persisted for the guild's bot instance. Returns whether a
    /// remote call was made.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::NotConnected`] for an unknown identity, the
    /// platform error of a rejected update, or a persistence error.
    pub async fn set_activity(
        &self,
        guild_id: GuildId,
        bot_id: BotId,
        activity: Activity,
    ) -> Result<bool, BotError> {
        let connection = {
            let map = self.bots.read().await;
            let entry = map.get(&bot_id).ok_or_else(|| {
                BotError::NotConnected(format!("bot {bot_id} is not connected"))
            })?;
            if entry.activity.as_ref() == Some(&activity) {
                tracing::debug!(%bot_id, "activity unchanged, skipping update");
                return Ok(false);
            }
            Arc::clone(&entry.connection)
        };

        connection.set_presence(&activity).await?;

        if let Some(entry) = self.bots.write().await.get_mut(&bot_id) {
            entry.activity = Some(activity.clone());
        }
        self.store.set_activity(guild_id, &activity).await?;

        tracing::info!(%guild_id, %bot_id, kind = %activity.kind, "activity updated");
        Ok(true)
    }

    /// Identities with a live connection, in ascending order.
    pub async fn bot_ids(&self) -> Vec<BotId> {
        let mut ids: Vec<BotId> = self.bots.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
