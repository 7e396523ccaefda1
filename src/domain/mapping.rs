//! Webhook cache records and coin-gated access mappings.

use serde::{Deserialize, Serialize};

use super::{ChannelId, GuildId};

/// A cached webhook endpoint for one (guild, channel).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    /// Guild of the channel.
    pub guild_id: GuildId,
    /// Channel the webhook posts into.
    pub channel_id: ChannelId,
    /// Full delivery URL.
    pub uri: String,
    /// Platform id of the webhook.
    pub remote_id: u64,
    /// Platform token of the webhook.
    pub remote_token: String,
}

/// Grants a role to members holding at least `required_balance` of a coin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleMapping {
    /// Guild the mapping belongs to.
    pub guild_id: GuildId,
    /// Coin whose balance is checked.
    pub coin_kind: String,
    /// Minimum balance to hold the role.
    pub required_balance: f64,
    /// Role name.
    pub role_name: String,
}

/// Opens a channel to members holding at least `required_balance` of a coin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMapping {
    /// Guild the mapping belongs to.
    pub guild_id: GuildId,
    /// Coin whose balance is checked.
    pub coin_kind: String,
    /// Minimum balance to see the channel.
    pub required_balance: f64,
    /// Channel name.
    pub channel: String,
}

/// A member's balance of one coin, as reported by the balance service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinBalance {
    /// Coin symbol.
    pub coin_kind: String,
    /// Held amount.
    pub balance: f64,
}

/// Balance of `coin` in `balances`, `0` when the coin is not held.
#[must_use]
pub fn balance_of(coin: &str, balances: &[CoinBalance]) -> f64 {
    balances
        .iter()
        .find(|b| b.coin_kind == coin)
        .map_or(0.0, |b| b.balance)
}
