//! In-crate fakes of the external collaborators, for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{Activity, BotId, ChannelId, CoinBalance, GuildId, MemberId};
use crate::error::{BotError, PlatformError};
use crate::platform::{
    BalanceClient, BotUser, ChatConnection, ChannelRef, CoinRewards, CoinSummary, Connector,
    Member, RemoteWebhook,
};
use crate::service::delivery::{WebhookMessage, WebhookTransport};

#[derive(Debug)]
struct ConnState {
    name: String,
    guilds: Vec<GuildId>,
    channels: HashMap<(GuildId, String), ChannelId>,
    members: HashMap<GuildId, Vec<Member>>,
    can_manage_webhooks: bool,
    webhooks_created: u64,
    presence_calls: u64,
    avatar_uploads: Vec<Vec<u8>>,
    rate_limit_profile_edits: bool,
    channel_access: HashMap<(GuildId, String, MemberId), bool>,
    closed: bool,
}

/// A scripted [`ChatConnection`].
#[derive(Debug)]
pub struct FakeConnection {
    id: BotId,
    token: String,
    state: Mutex<ConnState>,
}

static NEXT_CHANNEL: AtomicU64 = AtomicU64::new(1_000);
static NEXT_WEBHOOK: AtomicU64 = AtomicU64::new(5_000);

impl FakeConnection {
    /// A connection for bot `id` logged in with token `tok-<id>`.
    pub fn new(id: u64, name: &str) -> Arc<Self> {
        Arc::new(Self {
            id: BotId::new(id),
            token: format!("tok-{id}"),
            state: Mutex::new(ConnState {
                name: name.to_string(),
                guilds: Vec::new(),
                channels: HashMap::new(),
                members: HashMap::new(),
                can_manage_webhooks: true,
                webhooks_created: 0,
                presence_calls: 0,
                avatar_uploads: Vec::new(),
                rate_limit_profile_edits: false,
                channel_access: HashMap::new(),
                closed: false,
            }),
        })
    }

    /// The same connection as a trait object.
    pub fn clone_arc(self: &Arc<Self>) -> Arc<dyn ChatConnection> {
        Arc::clone(self) as Arc<dyn ChatConnection>
    }

    /// Adds a named channel (and its guild).
    pub async fn add_channel(&self, guild: GuildId, name: &str) {
        let mut state = self.state.lock().await;
        if !state.guilds.contains(&guild) {
            state.guilds.push(guild);
        }
        let id = ChannelId::new(NEXT_CHANNEL.fetch_add(1, Ordering::Relaxed));
        state.channels.insert((guild, name.to_string()), id);
    }

    /// Adds a member holding `roles`.
    pub async fn add_member(&self, guild: GuildId, member: u64, roles: &[&str]) {
        let mut state = self.state.lock().await;
        if !state.guilds.contains(&guild) {
            state.guilds.push(guild);
        }
        state.members.entry(guild).or_default().push(Member {
            id: MemberId::new(member),
            role_names: roles.iter().map(|r| (*r).to_string()).collect(),
        });
    }

    /// Role names a member currently holds.
    pub async fn roles_of(&self, guild: GuildId, member: u64) -> HashSet<String> {
        self.state
            .lock()
            .await
            .members
            .get(&guild)
            .and_then(|ms| ms.iter().find(|m| m.id == MemberId::new(member)))
            .map(|m| m.role_names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Last access set for a member on a channel.
    pub async fn channel_access(&self, guild: GuildId, channel: &str, member: u64) -> Option<bool> {
        self.state
            .lock()
            .await
            .channel_access
            .get(&(guild, channel.to_string(), MemberId::new(member)))
            .copied()
    }

    /// Toggles the manage-webhooks permission.
    pub async fn set_can_manage_webhooks(&self, allowed: bool) {
        self.state.lock().await.can_manage_webhooks = allowed;
    }

    /// Makes avatar and name edits fail with a rate limit.
    pub async fn rate_limit_profile_edits(&self) {
        self.state.lock().await.rate_limit_profile_edits = true;
    }

    /// Number of webhooks created so far.
    pub async fn webhooks_created(&self) -> u64 {
        self.state.lock().await.webhooks_created
    }

    /// Number of presence updates sent so far.
    pub async fn presence_calls(&self) -> u64 {
        self.state.lock().await.presence_calls
    }

    /// Avatar images uploaded so far.
    pub async fn avatar_uploads(&self) -> Vec<Vec<u8>> {
        self.state.lock().await.avatar_uploads.clone()
    }

    /// Current display name.
    pub async fn name(&self) -> String {
        self.state.lock().await.name.clone()
    }

    /// Whether [`ChatConnection::close`] was called.
    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}

#[async_trait]
impl ChatConnection for FakeConnection {
    fn user(&self) -> BotUser {
        BotUser {
            id: self.id,
            name: format!("bot-{}", self.id),
        }
    }

    fn token(&self) -> &str {
        &self.token
    }

    async fn guilds(&self) -> Result<Vec<GuildId>, PlatformError> {
        Ok(self.state.lock().await.guilds.clone())
    }

    async fn members(&self, guild: GuildId) -> Result<Vec<Member>, PlatformError> {
        Ok(self
            .state
            .lock()
            .await
            .members
            .get(&guild)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_channel(&self, guild: GuildId, name: &str) -> Result<ChannelRef, PlatformError> {
        self.state
            .lock()
            .await
            .channels
            .get(&(guild, name.to_string()))
            .map(|id| ChannelRef {
                id: *id,
                name: name.to_string(),
            })
            .ok_or_else(|| PlatformError::NotFound(format!("channel {name}")))
    }

    async fn can_manage_webhooks(&self, _guild: GuildId) -> Result<bool, PlatformError> {
        Ok(self.state.lock().await.can_manage_webhooks)
    }

    async fn create_webhook(
        &self,
        _guild: GuildId,
        channel: ChannelId,
        _name: &str,
    ) -> Result<RemoteWebhook, PlatformError> {
        let mut state = self.state.lock().await;
        if !state.can_manage_webhooks {
            return Err(PlatformError::Forbidden("manage webhooks".into()));
        }
        state.webhooks_created += 1;
        let id = NEXT_WEBHOOK.fetch_add(1, Ordering::Relaxed);
        Ok(RemoteWebhook {
            id,
            token: format!("wh-token-{id}"),
            url: format!("https://hooks.example/{channel}/{id}"),
        })
    }

    async fn set_presence(&self, _activity: &Activity) -> Result<(), PlatformError> {
        self.state.lock().await.presence_calls += 1;
        Ok(())
    }

    async fn edit_avatar(&self, image: &[u8]) -> Result<String, PlatformError> {
        let mut state = self.state.lock().await;
        if state.rate_limit_profile_edits {
            return Err(PlatformError::RateLimited {
                retry_after_secs: 3_600,
            });
        }
        state.avatar_uploads.push(image.to_vec());
        Ok(format!("https://cdn.example/avatars/{}.png", self.id))
    }

    async fn edit_name(&self, name: &str) -> Result<(), PlatformError> {
        let mut state = self.state.lock().await;
        if state.rate_limit_profile_edits {
            return Err(PlatformError::RateLimited {
                retry_after_secs: 3_600,
            });
        }
        state.name = name.to_string();
        Ok(())
    }

    async fn add_role(
        &self,
        guild: GuildId,
        member: MemberId,
        role_name: &str,
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock().await;
        let target = state
            .members
            .get_mut(&guild)
            .and_then(|ms| ms.iter_mut().find(|m| m.id == member))
            .ok_or_else(|| PlatformError::NotFound(format!("member {member}")))?;
        if !target.role_names.iter().any(|r| r == role_name) {
            target.role_names.push(role_name.to_string());
        }
        Ok(())
    }

    async fn remove_role(
        &self,
        guild: GuildId,
        member: MemberId,
        role_name: &str,
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock().await;
        let target = state
            .members
            .get_mut(&guild)
            .and_then(|ms| ms.iter_mut().find(|m| m.id == member))
            .ok_or_else(|| PlatformError::NotFound(format!("member {member}")))?;
        target.role_names.retain(|r| r != role_name);
        Ok(())
    }

    async fn set_channel_access(
        &self,
        guild: GuildId,
        channel_name: &str,
        member: MemberId,
        allow: bool,
    ) -> Result<(), PlatformError> {
        self.state
            .lock()
            .await
            .channel_access
            .insert((guild, channel_name.to_string(), member), allow);
        Ok(())
    }

    async fn close(&self) {
        self.state.lock().await.closed = true;
    }
}

/// A [`Connector`] handing out pre-registered connections by token.
#[derive(Debug, Default)]
pub struct FakeConnector {
    connections: Mutex<HashMap<String, Arc<FakeConnection>>>,
}

impl FakeConnector {
    /// Makes `connection` available under its token.
    pub async fn add(&self, connection: Arc<FakeConnection>) {
        self.connections
            .lock()
            .await
            .insert(connection.token().to_string(), connection);
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, token: &str) -> Result<Arc<dyn ChatConnection>, PlatformError> {
        self.connections
            .lock()
            .await
            .get(token)
            .map(FakeConnection::clone_arc)
            .ok_or_else(|| PlatformError::Forbidden("invalid token".into()))
    }
}

/// A [`BalanceClient`] with fixed figures and per-account balances.
#[derive(Debug, Default)]
pub struct FakeBalances {
    accounts: Mutex<HashMap<String, Vec<CoinBalance>>>,
}

impl FakeBalances {
    /// Sets the balances of an account.
    pub async fn set(&self, account: &str, balances: Vec<CoinBalance>) {
        self.accounts
            .lock()
            .await
            .insert(account.to_string(), balances);
    }
}

#[async_trait]
impl BalanceClient for FakeBalances {
    async fn balances(&self, account_id: &str) -> Result<Vec<CoinBalance>, PlatformError> {
        self.accounts
            .lock()
            .await
            .get(account_id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("account {account_id}")))
    }

    async fn coin_summary(&self, _coin: &str) -> Result<CoinSummary, PlatformError> {
        Ok(CoinSummary {
            total_coins: 1_000.123_4,
            total_supporters: 42.0,
            total_support_volume: 5_000.5,
        })
    }

    async fn coin_rewards(&self, _coin: &str) -> Result<CoinRewards, PlatformError> {
        Ok(CoinRewards {
            last_24_hour_earned: 12.345_6,
        })
    }

    fn coin_image_url(&self, coin: &str) -> String {
        format!("https://img.example/{coin}.png")
    }
}

/// A [`WebhookTransport`] recording every post; the first `n` fail.
#[derive(Debug)]
pub struct RecordingTransport {
    failures_left: Mutex<usize>,
    posts: Mutex<Vec<(String, WebhookMessage)>>,
}

impl RecordingTransport {
    /// A transport rejecting the first `n` posts.
    pub fn failing_first(n: usize) -> Self {
        Self {
            failures_left: Mutex::new(n),
            posts: Mutex::new(Vec::new()),
        }
    }

    /// Every attempted post, in order.
    pub async fn posts(&self) -> Vec<(String, WebhookMessage)> {
        self.posts.lock().await.clone()
    }
}

#[async_trait]
impl WebhookTransport for RecordingTransport {
    async fn post(&self, url: &str, message: &WebhookMessage) -> Result<(), BotError> {
        self.posts
            .lock()
            .await
            .push((url.to_string(), message.clone()));
        let mut left = self.failures_left.lock().await;
        if *left > 0 {
            *left -= 1;
            return Err(BotError::DeliveryFailed("404 Not Found".into()));
        }
        Ok(())
    }
}
