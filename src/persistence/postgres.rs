//! PostgreSQL implementation of the [`Store`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::Store;
use super::models::{
    BotInstanceRow, TimerRow, bot_instance_from_row, from_db, timer_from_row, to_db,
};
use crate::config::BotConfig;
use crate::domain::{
    Activity, AlertKind, AlertsSettings, BotId, BotInstance, ChannelId, ChannelMapping, GuildId,
    MemberId, NewTimer, RoleMapping, StoredTask, TaskId, TaskKind, Timer, TimerId, Webhook,
};
use crate::error::BotError;

const BOT_INSTANCE_COLUMNS: &str = "guild_id, bot_id, bot_token, bot_name, bot_avatar, \
     avatar_timeout, name_timeout, activity_type, activity_text";

/// PostgreSQL-backed store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a store over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects with the pool settings from `config` and runs the
    /// embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::PersistenceError`] if the database is
    /// unreachable or a migration fails.
    pub async fn connect(config: &BotConfig) -> Result<Self, BotError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| BotError::PersistenceError(format!("migration: {e}")))?;

        tracing::info!(
            max_connections = config.database_max_connections,
            "connected to postgres"
        );
        Ok(Self::new(pool))
    }

    async fn update_instance_text(
        &self,
        column: &'static str,
        guild_id: GuildId,
        value: &str,
    ) -> Result<(), BotError> {
        let sql = format!("UPDATE bot_instances SET {column} = $2 WHERE guild_id = $1");
        sqlx::query(&sql)
            .bind(to_db(guild_id.get()))
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_instance_epoch(
        &self,
        column: &'static str,
        guild_id: GuildId,
        until: i64,
    ) -> Result<(), BotError> {
        let sql = format!("UPDATE bot_instances SET {column} = $2 WHERE guild_id = $1");
        sqlx::query(&sql)
            .bind(to_db(guild_id.get()))
            .bind(until)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn add_task(&self, task: &TaskKind) -> Result<TaskId, BotError> {
        let body = serde_json::to_value(task).map_err(|e| BotError::Internal(e.to_string()))?;
        let id = sqlx::query_scalar::<_, i64>("INSERT INTO tasks (body) VALUES ($1) RETURNING id")
            .bind(body)
            .fetch_one(&self.pool)
            .await?;
        Ok(TaskId::new(id))
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<StoredTask>, BotError> {
        let row = sqlx::query_as::<_, (i64, serde_json::Value)>(
            "SELECT id, body FROM tasks WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, body)| StoredTask {
            id: TaskId::new(id),
            body,
        }))
    }

    async fn list_tasks(&self) -> Result<Vec<StoredTask>, BotError> {
        let rows = sqlx::query_as::<_, (i64, serde_json::Value)>(
            "SELECT id, body FROM tasks ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, body)| StoredTask {
                id: TaskId::new(id),
                body,
            })
            .collect())
    }

    async fn delete_task(&self, id: TaskId) -> Result<bool, BotError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_timer(&self, timer: &NewTimer) -> Result<TimerId, BotError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO timers (guild_id, expires_at, event, extras, bot_id) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(to_db(timer.guild_id.get()))
        .bind(timer.expires_at)
        .bind(&timer.event)
        .bind(serde_json::Value::Object(timer.extras.clone()))
        .bind(to_db(timer.bot_id.get()))
        .fetch_one(&self.pool)
        .await?;
        Ok(TimerId::new(id))
    }

    async fn get_timer(&self, id: TimerId) -> Result<Option<Timer>, BotError> {
        let row = sqlx::query_as::<_, TimerRow>(
            "SELECT id, guild_id, expires_at, event, extras, bot_id FROM timers WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(timer_from_row))
    }

    async fn delete_timer(&self, id: TimerId) -> Result<bool, BotError> {
        let result = sqlx::query("DELETE FROM timers WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_timers(&self, bot_id: BotId) -> Result<Vec<Timer>, BotError> {
        let rows = sqlx::query_as::<_, TimerRow>(
            "SELECT id, guild_id, expires_at, event, extras, bot_id FROM timers \
             WHERE bot_id = $1 ORDER BY expires_at ASC",
        )
        .bind(to_db(bot_id.get()))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(timer_from_row).collect())
    }

    async fn delete_guild_timers(&self, guild_id: GuildId) -> Result<u64, BotError> {
        let result = sqlx::query("DELETE FROM timers WHERE guild_id = $1")
            .bind(to_db(guild_id.get()))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn alerts_settings(
        &self,
        guild_id: GuildId,
    ) -> Result<Option<AlertsSettings>, BotError> {
        let row = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT settings FROM alerts_settings WHERE guild_id = $1",
        )
        .bind(to_db(guild_id.get()))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok(None),
            Some(raw) => match serde_json::from_value(raw) {
                Ok(settings) => Ok(Some(settings)),
                Err(e) => {
                    tracing::warn!(%guild_id, error = %e, "stored alert settings do not parse");
                    Ok(None)
                }
            },
        }
    }

    async fn set_alerts_settings(
        &self,
        guild_id: GuildId,
        settings: &AlertsSettings,
    ) -> Result<(), BotError> {
        let raw = serde_json::to_value(settings).map_err(|e| BotError::Internal(e.to_string()))?;
        sqlx::query(
            "INSERT INTO alerts_settings (guild_id, settings) VALUES ($1, $2) \
             ON CONFLICT (guild_id) DO UPDATE SET settings = EXCLUDED.settings",
        )
        .bind(to_db(guild_id.get()))
        .bind(raw)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn default_coin(&self, guild_id: GuildId) -> Result<Option<String>, BotError> {
        let coin = sqlx::query_scalar::<_, String>(
            "SELECT coin_kind FROM default_coins WHERE guild_id = $1",
        )
        .bind(to_db(guild_id.get()))
        .fetch_optional(&self.pool)
        .await?;
        Ok(coin)
    }

    async fn set_default_coin(&self, guild_id: GuildId, coin: &str) -> Result<(), BotError> {
        sqlx::query(
            "INSERT INTO default_coins (guild_id, coin_kind) VALUES ($1, $2) \
             ON CONFLICT (guild_id) DO UPDATE SET coin_kind = EXCLUDED.coin_kind",
        )
        .bind(to_db(guild_id.get()))
        .bind(coin)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn guilds_by_coin(&self, coin: &str) -> Result<Vec<GuildId>, BotError> {
        let rows = sqlx::query_scalar::<_, i64>(
            "SELECT guild_id FROM default_coins WHERE coin_kind = $1 ORDER BY guild_id",
        )
        .bind(coin)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|id| GuildId::new(from_db(id)))
            .collect())
    }

    async fn bot_instance(&self, guild_id: GuildId) -> Result<Option<BotInstance>, BotError> {
        let sql = format!("SELECT {BOT_INSTANCE_COLUMNS} FROM bot_instances WHERE guild_id = $1");
        let row = sqlx::query_as::<_, BotInstanceRow>(&sql)
            .bind(to_db(guild_id.get()))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(bot_instance_from_row))
    }

    async fn bot_instance_by_token(&self, token: &str) -> Result<Option<BotInstance>, BotError> {
        let sql = format!("SELECT {BOT_INSTANCE_COLUMNS} FROM bot_instances WHERE bot_token = $1");
        let row = sqlx::query_as::<_, BotInstanceRow>(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(bot_instance_from_row))
    }

    async fn list_bot_instances(&self) -> Result<Vec<BotInstance>, BotError> {
        let sql = format!("SELECT {BOT_INSTANCE_COLUMNS} FROM bot_instances ORDER BY guild_id");
        let rows = sqlx::query_as::<_, BotInstanceRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(bot_instance_from_row).collect())
    }

    async fn add_bot_instance(&self, guild_id: GuildId, token: &str) -> Result<(), BotError> {
        sqlx::query(
            "INSERT INTO bot_instances (guild_id, bot_token) VALUES ($1, $2) \
             ON CONFLICT (guild_id) DO UPDATE SET bot_token = EXCLUDED.bot_token, bot_id = NULL",
        )
        .bind(to_db(guild_id.get()))
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_bot_instance(&self, guild_id: GuildId) -> Result<bool, BotError> {
        let result = sqlx::query("DELETE FROM bot_instances WHERE guild_id = $1")
            .bind(to_db(guild_id.get()))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_bot_id(&self, token: &str, bot_id: BotId) -> Result<(), BotError> {
        sqlx::query("UPDATE bot_instances SET bot_id = $2 WHERE bot_token = $1")
            .bind(token)
            .bind(to_db(bot_id.get()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_bot_name(&self, guild_id: GuildId, name: &str) -> Result<(), BotError> {
        self.update_instance_text("bot_name", guild_id, name).await
    }

    async fn set_bot_avatar(&self, guild_id: GuildId, url: &str) -> Result<(), BotError> {
        self.update_instance_text("bot_avatar", guild_id, url).await
    }

    async fn set_avatar_timeout(&self, guild_id: GuildId, until: i64) -> Result<(), BotError> {
        self.update_instance_epoch("avatar_timeout", guild_id, until)
            .await
    }

    async fn set_name_timeout(&self, guild_id: GuildId, until: i64) -> Result<(), BotError> {
        self.update_instance_epoch("name_timeout", guild_id, until)
            .await
    }

    async fn set_activity(&self, guild_id: GuildId, activity: &Activity) -> Result<(), BotError> {
        sqlx::query(
            "UPDATE bot_instances SET activity_type = $2, activity_text = $3 WHERE guild_id = $1",
        )
        .bind(to_db(guild_id.get()))
        .bind(activity.kind.as_str())
        .bind(&activity.text)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn webhook(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Option<Webhook>, BotError> {
        let row = sqlx::query_as::<_, (String, i64, String)>(
            "SELECT uri, remote_id, remote_token FROM webhooks \
             WHERE guild_id = $1 AND channel_id = $2",
        )
        .bind(to_db(guild_id.get()))
        .bind(to_db(channel_id.get()))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(uri, remote_id, remote_token)| Webhook {
            guild_id,
            channel_id,
            uri,
            remote_id: from_db(remote_id),
            remote_token,
        }))
    }

    async fn add_webhook(&self, webhook: &Webhook) -> Result<(), BotError> {
        sqlx::query(
            "INSERT INTO webhooks (guild_id, channel_id, uri, remote_id, remote_token) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (guild_id, channel_id) DO UPDATE SET uri = EXCLUDED.uri, \
             remote_id = EXCLUDED.remote_id, remote_token = EXCLUDED.remote_token",
        )
        .bind(to_db(webhook.guild_id.get()))
        .bind(to_db(webhook.channel_id.get()))
        .bind(&webhook.uri)
        .bind(to_db(webhook.remote_id))
        .bind(&webhook.remote_token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_webhook(&self, uri: &str) -> Result<bool, BotError> {
        let result = sqlx::query("DELETE FROM webhooks WHERE uri = $1")
            .bind(uri)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_event(
        &self,
        kind: AlertKind,
        coin: &str,
        at: DateTime<Utc>,
    ) -> Result<(), BotError> {
        sqlx::query("INSERT INTO events (event, coin_kind, created_at) VALUES ($1, $2, $3)")
            .bind(kind.as_str())
            .bind(coin)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_events(
        &self,
        kind: AlertKind,
        coin: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, BotError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM events WHERE event = $1 AND coin_kind = $2 AND created_at >= $3",
        )
        .bind(kind.as_str())
        .bind(coin)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, BotError> {
        let result = sqlx::query("DELETE FROM events WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn role_mappings(&self, guild_id: GuildId) -> Result<Vec<RoleMapping>, BotError> {
        let rows = sqlx::query_as::<_, (String, f64, String)>(
            "SELECT coin_kind, required_balance, role_name FROM role_mappings \
             WHERE guild_id = $1 ORDER BY id",
        )
        .bind(to_db(guild_id.get()))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(coin_kind, required_balance, role_name)| RoleMapping {
                guild_id,
                coin_kind,
                required_balance,
                role_name,
            })
            .collect())
    }

    async fn channel_mappings(&self, guild_id: GuildId) -> Result<Vec<ChannelMapping>, BotError> {
        let rows = sqlx::query_as::<_, (String, f64, String)>(
            "SELECT coin_kind, required_balance, channel FROM channel_mappings \
             WHERE guild_id = $1 ORDER BY id",
        )
        .bind(to_db(guild_id.get()))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(coin_kind, required_balance, channel)| ChannelMapping {
                guild_id,
                coin_kind,
                required_balance,
                channel,
            })
            .collect())
    }

    async fn linked_account(&self, member_id: MemberId) -> Result<Option<String>, BotError> {
        let account = sqlx::query_scalar::<_, String>(
            "SELECT account_id FROM linked_accounts WHERE member_id = $1",
        )
        .bind(to_db(member_id.get()))
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }
}
