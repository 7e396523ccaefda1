//! Seams to the external collaborators: the chat platform session and the
//! balance lookup service.
//!
//! The crate never talks to a vendor SDK directly. The embedding process
//! supplies implementations of these traits; every call reports failures
//! as a [`PlatformError`] kind.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Activity, BotId, ChannelId, CoinBalance, GuildId, MemberId};
use crate::error::PlatformError;

/// The logged-in user of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotUser {
    /// Bot user id.
    pub id: BotId,
    /// Current display name.
    pub name: String,
}

/// A channel looked up by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRef {
    /// Channel id.
    pub id: ChannelId,
    /// Channel name.
    pub name: String,
}

/// A webhook just created on the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteWebhook {
    /// Platform id.
    pub id: u64,
    /// Platform token.
    pub token: String,
    /// Delivery URL.
    pub url: String,
}

/// A guild member and the role names they currently hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Member id.
    pub id: MemberId,
    /// Names of the roles the member holds.
    pub role_names: Vec<String>,
}

/// A live, ready session of one bot identity.
#[async_trait]
pub trait ChatConnection: Send + Sync + fmt::Debug {
    /// The logged-in bot user.
    fn user(&self) -> BotUser;

    /// Login token of the session.
    fn token(&self) -> &str;

    /// Guilds the bot is a member of.
    async fn guilds(&self) -> Result<Vec<GuildId>, PlatformError>;

    /// All members of a guild.
    async fn members(&self, guild: GuildId) -> Result<Vec<Member>, PlatformError>;

    /// Finds a channel by name.
    async fn find_channel(&self, guild: GuildId, name: &str)
    -> Result<ChannelRef, PlatformError>;

    /// Whether the bot may create webhooks in the guild.
    async fn can_manage_webhooks(&self, guild: GuildId) -> Result<bool, PlatformError>;

    /// Creates a webhook in a channel.
    async fn create_webhook(
        &self,
        guild: GuildId,
        channel: ChannelId,
        name: &str,
    ) -> Result<RemoteWebhook, PlatformError>;

    /// Applies a presence.
    async fn set_presence(&self, activity: &Activity) -> Result<(), PlatformError>;

    /// Uploads a new avatar, returning its URL.
    async fn edit_avatar(&self, image: &[u8]) -> Result<String, PlatformError>;

    /// Changes the bot's display name.
    async fn edit_name(&self, name: &str) -> Result<(), PlatformError>;

    /// Gives a member a role by name.
    async fn add_role(
        &self,
        guild: GuildId,
        member: MemberId,
        role_name: &str,
    ) -> Result<(), PlatformError>;

    /// Takes a role away from a member by name.
    async fn remove_role(
        &self,
        guild: GuildId,
        member: MemberId,
        role_name: &str,
    ) -> Result<(), PlatformError>;

    /// Opens (`allow = true`) or closes a channel for a member.
    async fn set_channel_access(
        &self,
        guild: GuildId,
        channel_name: &str,
        member: MemberId,
        allow: bool,
    ) -> Result<(), PlatformError>;

    /// Ends the session.
    async fn close(&self);
}

/// Logs bot identities in.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Opens a session with `token` and waits until it is ready.
    async fn connect(&self, token: &str) -> Result<Arc<dyn ChatConnection>, PlatformError>;
}

/// Totals of a coin across all holders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinSummary {
    /// Coins in circulation.
    pub total_coins: f64,
    /// Number of holders.
    pub total_supporters: f64,
    /// Total support volume in USD.
    pub total_support_volume: f64,
}

/// Reward figures of a coin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinRewards {
    /// Rewards earned in the last 24 hours.
    pub last_24_hour_earned: f64,
}

/// The external balance lookup service.
#[async_trait]
pub trait BalanceClient: Send + Sync + fmt::Debug {
    /// Balances held by a linked account.
    async fn balances(&self, account_id: &str) -> Result<Vec<CoinBalance>, PlatformError>;

    /// Totals of a coin.
    async fn coin_summary(&self, coin: &str) -> Result<CoinSummary, PlatformError>;

    /// Reward figures of a coin.
    async fn coin_rewards(&self, coin: &str) -> Result<CoinRewards, PlatformError>;

    /// Image URL used as the embed author icon.
    fn coin_image_url(&self, coin: &str) -> String;
}
