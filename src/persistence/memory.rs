//! In-memory [`Store`] implementation.
//!
//! Used when `PERSISTENCE_ENABLED=false` and by tests. All state sits
//! behind one [`tokio::sync::Mutex`]; nothing survives the process.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::Store;
use crate::domain::{
    Activity, AlertKind, AlertsSettings, BotId, BotInstance, ChannelId, ChannelMapping, GuildId,
    MemberId, NewTimer, RoleMapping, StoredTask, TaskId, TaskKind, Timer, TimerId, Webhook,
};
use crate::error::BotError;

#[derive(Debug, Default)]
struct State {
    next_task_id: i64,
    next_timer_id: i64,
    tasks: BTreeMap<TaskId, serde_json::Value>,
    timers: BTreeMap<TimerId, Timer>,
    alerts_settings: HashMap<GuildId, AlertsSettings>,
    default_coins: HashMap<GuildId, String>,
    bot_instances: BTreeMap<GuildId, BotInstance>,
    webhooks: HashMap<(GuildId, ChannelId), Webhook>,
    events: Vec<(AlertKind, String, DateTime<Utc>)>,
    role_mappings: Vec<RoleMapping>,
    channel_mappings: Vec<ChannelMapping>,
    linked_accounts: HashMap<MemberId, String>,
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a raw task body, bypassing [`TaskKind`] validation.
    pub async fn add_raw_task(&self, body: serde_json::Value) -> TaskId {
        let mut state = self.state.lock().await;
        state.next_task_id += 1;
        let id = TaskId::new(state.next_task_id);
        state.tasks.insert(id, body);
        id
    }

    /// Adds a role mapping.
    pub async fn add_role_mapping(&self, mapping: RoleMapping) {
        self.state.lock().await.role_mappings.push(mapping);
    }

    /// Adds a channel mapping.
    pub async fn add_channel_mapping(&self, mapping: ChannelMapping) {
        self.state.lock().await.channel_mappings.push(mapping);
    }

    /// Links a member to a balance account.
    pub async fn link_account(&self, member_id: MemberId, account_id: impl Into<String>) {
        self.state
            .lock()
            .await
            .linked_accounts
            .insert(member_id, account_id.into());
    }

    /// Number of cached webhooks.
    pub async fn webhook_count(&self) -> usize {
        self.state.lock().await.webhooks.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn add_task(&self, task: &TaskKind) -> Result<TaskId, BotError> {
        let body = serde_json::to_value(task).map_err(|e| BotError::Internal(e.to_string()))?;
        Ok(self.add_raw_task(body).await)
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<StoredTask>, BotError> {
        let state = self.state.lock().await;
        Ok(state.tasks.get(&id).map(|body| StoredTask {
            id,
            body: body.clone(),
        }))
    }

    async fn list_tasks(&self) -> Result<Vec<StoredTask>, BotError> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .iter()
            .map(|(id, body)| StoredTask {
                id: *id,
                body: body.clone(),
            })
            .collect())
    }

    async fn delete_task(&self, id: TaskId) -> Result<bool, BotError> {
        Ok(self.state.lock().await.tasks.remove(&id).is_some())
    }

    async fn add_timer(&self, timer: &NewTimer) -> Result<TimerId, BotError> {
        let mut state = self.state.lock().await;
        state.next_timer_id += 1;
        let id = TimerId::new(state.next_timer_id);
        state.timers.insert(id, timer.clone().with_id(id));
        Ok(id)
    }

    async fn get_timer(&self, id: TimerId) -> Result<Option<Timer>, BotError> {
        Ok(self.state.lock().await.timers.get(&id).cloned())
    }

    async fn delete_timer(&self, id: TimerId) -> Result<bool, BotError> {
        Ok(self.state.lock().await.timers.remove(&id).is_some())
    }

    async fn list_timers(&self, bot_id: BotId) -> Result<Vec<Timer>, BotError> {
        let state = self.state.lock().await;
        Ok(state
            .timers
            .values()
            .filter(|t| t.bot_id == bot_id)
            .cloned()
            .collect())
    }

    async fn delete_guild_timers(&self, guild_id: GuildId) -> Result<u64, BotError> {
        let mut state = self.state.lock().await;
        let before = state.timers.len();
        state.timers.retain(|_, t| t.guild_id != guild_id);
        Ok(u64::try_from(before - state.timers.len()).unwrap_or(u64::MAX))
    }

    async fn alerts_settings(
        &self,
        guild_id: GuildId,
    ) -> Result<Option<AlertsSettings>, BotError> {
        Ok(self.state.lock().await.alerts_settings.get(&guild_id).cloned())
    }

    async fn set_alerts_settings(
        &self,
        guild_id: GuildId,
        settings: &AlertsSettings,
    ) -> Result<(), BotError> {
        self.state
            .lock()
            .await
            .alerts_settings
            .insert(guild_id, settings.clone());
        Ok(())
    }

    async fn default_coin(&self, guild_id: GuildId) -> Result<Option<String>, BotError> {
        Ok(self.state.lock().await.default_coins.get(&guild_id).cloned())
    }

    async fn set_default_coin(&self, guild_id: GuildId, coin: &str) -> Result<(), BotError> {
        self.state
            .lock()
            .await
            .default_coins
            .insert(guild_id, coin.to_string());
        Ok(())
    }

    async fn guilds_by_coin(&self, coin: &str) -> Result<Vec<GuildId>, BotError> {
        let state = self.state.lock().await;
        let mut guilds: Vec<GuildId> = state
            .default_coins
            .iter()
            .filter(|(_, c)| c.as_str() == coin)
            .map(|(g, _)| *g)
            .collect();
        guilds.sort();
        Ok(guilds)
    }

    async fn bot_instance(&self, guild_id: GuildId) -> Result<Option<BotInstance>, BotError> {
        Ok(self.state.lock().await.bot_instances.get(&guild_id).cloned())
    }

    async fn bot_instance_by_token(&self, token: &str) -> Result<Option<BotInstance>, BotError> {
        let state = self.state.lock().await;
        Ok(state
            .bot_instances
            .values()
            .find(|i| i.bot_token == token)
            .cloned())
    }

    async fn list_bot_instances(&self) -> Result<Vec<BotInstance>, BotError> {
        Ok(self.state.lock().await.bot_instances.values().cloned().collect())
    }

    async fn add_bot_instance(&self, guild_id: GuildId, token: &str) -> Result<(), BotError> {
        self.state
            .lock()
            .await
            .bot_instances
            .insert(guild_id, BotInstance::new(guild_id, token));
        Ok(())
    }

    async fn remove_bot_instance(&self, guild_id: GuildId) -> Result<bool, BotError> {
        Ok(self
            .state
            .lock()
            .await
            .bot_instances
            .remove(&guild_id)
            .is_some())
    }

    async fn set_bot_id(&self, token: &str, bot_id: BotId) -> Result<(), BotError> {
        let mut state = self.state.lock().await;
        for instance in state.bot_instances.values_mut() {
            if instance.bot_token == token {
                instance.bot_id = Some(bot_id);
            }
        }
        Ok(())
    }

    async fn set_bot_name(&self, guild_id: GuildId, name: &str) -> Result<(), BotError> {
        self.update_instance(guild_id, |i| i.bot_name = Some(name.to_string()))
            .await
    }

    async fn set_bot_avatar(&self, guild_id: GuildId, url: &str) -> Result<(), BotError> {
        self.update_instance(guild_id, |i| i.bot_avatar = Some(url.to_string()))
            .await
    }

    async fn set_avatar_timeout(&self, guild_id: GuildId, until: i64) -> Result<(), BotError> {
        self.update_instance(guild_id, |i| i.avatar_timeout = until)
            .await
    }

    async fn set_name_timeout(&self, guild_id: GuildId, until: i64) -> Result<(), BotError> {
        self.update_instance(guild_id, |i| i.name_timeout = until)
            .await
    }

    async fn set_activity(&self, guild_id: GuildId, activity: &Activity) -> Result<(), BotError> {
        self.update_instance(guild_id, |i| i.activity = Some(activity.clone()))
            .await
    }

    async fn webhook(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Option<Webhook>, BotError> {
        Ok(self
            .state
            .lock()
            .await
            .webhooks
            .get(&(guild_id, channel_id))
            .cloned())
    }

    async fn add_webhook(&self, webhook: &Webhook) -> Result<(), BotError> {
        self.state
            .lock()
            .await
            .webhooks
            .insert((webhook.guild_id, webhook.channel_id), webhook.clone());
        Ok(())
    }

    async fn delete_webhook(&self, uri: &str) -> Result<bool, BotError> {
        let mut state = self.state.lock().await;
        let before = state.webhooks.len();
        state.webhooks.retain(|_, w| w.uri != uri);
        Ok(state.webhooks.len() < before)
    }

    async fn add_event(
        &self,
        kind: AlertKind,
        coin: &str,
        at: DateTime<Utc>,
    ) -> Result<(), BotError> {
        self.state
            .lock()
            .await
            .events
            .push((kind, coin.to_string(), at));
        Ok(())
    }

    async fn count_events(
        &self,
        kind: AlertKind,
        coin: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, BotError> {
        let state = self.state.lock().await;
        let count = state
            .events
            .iter()
            .filter(|(k, c, at)| *k == kind && c == coin && *at >= since)
            .count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, BotError> {
        let mut state = self.state.lock().await;
        let before = state.events.len();
        state.events.retain(|(_, _, at)| *at >= cutoff);
        Ok(u64::try_from(before - state.events.len()).unwrap_or(u64::MAX))
    }

    async fn role_mappings(&self, guild_id: GuildId) -> Result<Vec<RoleMapping>, BotError> {
        let state = self.state.lock().await;
        Ok(state
            .role_mappings
            .iter()
            .filter(|m| m.guild_id == guild_id)
            .cloned()
            .collect())
    }

    async fn channel_mappings(&self, guild_id: GuildId) -> Result<Vec<ChannelMapping>, BotError> {
        let state = self.state.lock().await;
        Ok(state
            .channel_mappings
            .iter()
            .filter(|m| m.guild_id == guild_id)
            .cloned()
            .collect())
    }

    async fn linked_account(&self, member_id: MemberId) -> Result<Option<String>, BotError> {
        Ok(self.state.lock().await.linked_accounts.get(&member_id).cloned())
    }
}

impl MemoryStore {
    async fn update_instance<F>(&self, guild_id: GuildId, apply: F) -> Result<(), BotError>
    where
        F: FnOnce(&mut BotInstance) + Send,
    {
        let mut state = self.state.lock().await;
        let instance = state
            .bot_instances
            .get_mut(&guild_id)
            .ok_or_else(|| BotError::NotFound(format!("bot instance for guild {guild_id}")))?;
        apply(instance);
        Ok(())
    }
}
