//! Coin-gated access: grants and revokes mapped roles and channels from
//! members' current balances.
//!
//! The periodic cycle and the manual single-member path share one mutex,
//! so a manual reconcile never interleaves with a running cycle.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::domain::{
    BotId, ChannelMapping, GuildId, InstanceRegistry, MemberId, RoleMapping, balance_of,
};
use crate::error::BotError;
use crate::persistence::Store;
use crate::platform::{BalanceClient, ChatConnection, Member};

/// Counts of one reconcile run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Guilds visited.
    pub guilds: usize,
    /// Members checked.
    pub members: usize,
    /// Roles given or channels opened.
    pub grants: usize,
    /// Roles taken or channels closed.
    pub revocations: usize,
    /// Members or guilds that failed and were skipped.
    pub errors: usize,
}

#[derive(Debug, Default)]
struct Mappings {
    roles: Vec<RoleMapping>,
    channels: Vec<ChannelMapping>,
}

impl Mappings {
    fn is_empty(&self) -> bool {
        self.roles.is_empty() && self.channels.is_empty()
    }
}

/// Reconciles member access against role and channel mappings.
#[derive(Debug)]
pub struct Reconciler {
    store: Arc<dyn Store>,
    registry: Arc<InstanceRegistry>,
    balances: Arc<dyn BalanceClient>,
    lock: Mutex<()>,
}

impl Reconciler {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<InstanceRegistry>,
        balances: Arc<dyn BalanceClient>,
    ) -> Self {
        Self {
            store,
            registry,
            balances,
            lock: Mutex::new(()),
        }
    }

    /// Reconciles every linked member of every guild the bot is in.
    /// Per-member failures are counted and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::NotConnected`] if the bot is not registered, or
    /// the platform error of listing its guilds.
    pub async fn run_cycle(&self, bot_id: BotId) -> Result<ReconcileReport, BotError> {
        let _cycle = self.lock.lock().await;
        let connection = self.registry.connection(bot_id).await?;
        let mut report = ReconcileReport::default();

        for guild_id in connection.guilds().await? {
            report.guilds += 1;
            let mappings = match self.mappings(guild_id).await {
                Ok(m) if m.is_empty() => continue,
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(%guild_id, error = %e, "could not load mappings");
                    report.errors += 1;
                    continue;
                }
            };
            let members = match connection.members(guild_id).await {
                Ok(members) => members,
                Err(e) => {
                    tracing::warn!(%guild_id, error = %e, "could not list members");
                    report.errors += 1;
                    continue;
                }
            };

            for member in &members {
                report.members += 1;
                if let Err(e) = self
                    .apply(connection.as_ref(), guild_id, member, &mappings, &mut report)
                    .await
                {
                    tracing::warn!(%guild_id, member_id = %member.id, error = %e, "member not reconciled");
                    report.errors += 1;
                }
            }
        }

        tracing::info!(
            %bot_id,
            guilds = report.guilds,
            members = report.members,
            grants = report.grants,
            revocations = report.revocations,
            errors = report.errors,
            "reconcile cycle done"
        );
        Ok(report)
    }

    /// Reconciles one member in every guild of the bot they belong to.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::NotFound`] if the member is in none of the
    /// bot's guilds, or the first platform, balance or persistence error.
    pub async fn reconcile_member(
        &self,
        bot_id: BotId,
        member_id: MemberId,
    ) -> Result<ReconcileReport, BotError> {
        let _cycle = self.lock.lock().await;
        let connection = self.registry.connection(bot_id).await?;
        let mut report = ReconcileReport::default();

        for guild_id in connection.guilds().await? {
            let members = connection.members(guild_id).await?;
            let Some(member) = members.iter().find(|m| m.id == member_id) else {
                continue;
            };
            report.guilds += 1;
            report.members += 1;
            let mappings = self.mappings(guild_id).await?;
            self.apply(connection.as_ref(), guild_id, member, &mappings, &mut report)
                .await?;
        }

        if report.members == 0 {
            return Err(BotError::NotFound(format!(
                "member {member_id} is in no guild of bot {bot_id}"
            )));
        }
        Ok(report)
    }

    /// Runs [`run_cycle`](Self::run_cycle) every `interval` until the bot
    /// disconnects.
    pub fn spawn(self: Arc<Self>, bot_id: BotId, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.run_cycle(bot_id).await {
                    Ok(_) => {}
                    Err(BotError::NotConnected(_)) => {
                        tracing::info!(%bot_id, "bot disconnected, stopping reconcile loop");
                        break;
                    }
                    Err(e) => tracing::warn!(%bot_id, error = %e, "reconcile cycle failed"),
                }
            }
        })
    }

    async fn mappings(&self, guild_id: GuildId) -> Result<Mappings, BotError> {
        Ok(Mappings {
            roles: self.store.role_mappings(guild_id).await?,
            channels: self.store.channel_mappings(guild_id).await?,
        })
    }

    async fn apply(
        &self,
        connection: &dyn ChatConnection,
        guild_id: GuildId,
        member: &Member,
        mappings: &Mappings,
        report: &mut ReconcileReport,
    ) -> Result<(), BotError> {
        let Some(account) = self.store.linked_account(member.id).await? else {
            return Ok(());
        };
        let balances = self.balances.balances(&account).await?;

        for mapping in &mappings.roles {
            let qualifies = balance_of(&mapping.coin_kind, &balances) >= mapping.required_balance;
            let holds = member.role_names.iter().any(|r| *r == mapping.role_name);
            if qualifies && !holds {
                connection
                    .add_role(guild_id, member.id, &mapping.role_name)
                    .await?;
                report.grants += 1;
            } else if !qualifies && holds {
                connection
                    .remove_role(guild_id, member.id, &mapping.role_name)
                    .await?;
                report.revocations += 1;
            }
        }

        for mapping in &mappings.channels {
            let allow = balance_of(&mapping.coin_kind, &balances) >= mapping.required_balance;
            connection
                .set_channel_access(guild_id, &mapping.channel, member.id, allow)
                .await?;
            if allow {
                report.grants += 1;
            } else {
                report.revocations += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::CoinBalance;
    use crate::error::PlatformError;
    use crate::persistence::MemoryStore;
    use crate::testing::{FakeBalances, FakeConnection};

    const GUILD: GuildId = GuildId::new(10);

    struct Harness {
        store: Arc<MemoryStore>,
        conn: Arc<FakeConnection>,
        balances: Arc<FakeBalances>,
        reconciler: Reconciler,
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let dyn_store = Arc::clone(&store) as Arc<dyn Store>;
        let registry = Arc::new(InstanceRegistry::new(Arc::clone(&dyn_store)));
        let conn = FakeConnection::new(1, "shared");
        registry.register(BotId::new(1), conn.clone_arc()).await;

        store
            .add_role_mapping(RoleMapping {
                guild_id: GUILD,
                coin_kind: "STANZ".into(),
                required_balance: 100.0,
                role_name: "whale".into(),
            })
            .await;
        store
            .add_channel_mapping(ChannelMapping {
                guild_id: GUILD,
                coin_kind: "STANZ".into(),
                required_balance: 10.0,
                channel: "holders".into(),
            })
            .await;

        let balances = Arc::new(FakeBalances::default());
        let reconciler = Reconciler::new(
            dyn_store,
            registry,
            Arc::clone(&balances) as Arc<dyn BalanceClient>,
        );
        Harness {
            store,
            conn,
            balances,
            reconciler,
        }
    }

    fn stanz(balance: f64) -> Vec<CoinBalance> {
        vec![CoinBalance {
            coin_kind: "STANZ".into(),
            balance,
        }]
    }

    #[tokio::test]
    async fn cycle_grants_and_revokes() {
        let h = harness().await;
        h.conn.add_member(GUILD, 1, &[]).await;
        h.conn.add_member(GUILD, 2, &["whale"]).await;
        h.conn.add_member(GUILD, 3, &["whale"]).await;
        h.store.link_account(MemberId::new(1), "acc-1").await;
        h.store.link_account(MemberId::new(2), "acc-2").await;
        h.balances.set("acc-1", stanz(150.0)).await;
        h.balances.set("acc-2", stanz(5.0)).await;

        let Ok(report) = h.reconciler.run_cycle(BotId::new(1)).await else {
            panic!("cycle should run");
        };
        assert_eq!(report.members, 3);
        assert!(h.conn.roles_of(GUILD, 1).await.contains("whale"));
        assert!(!h.conn.roles_of(GUILD, 2).await.contains("whale"));
        // Member 3 has no linked account and is left alone.
        assert!(h.conn.roles_of(GUILD, 3).await.contains("whale"));
        assert_eq!(h.conn.channel_access(GUILD, "holders", 1).await, Some(true));
        assert_eq!(h.conn.channel_access(GUILD, "holders", 2).await, Some(false));
        assert_eq!(h.conn.channel_access(GUILD, "holders", 3).await, None);
    }

    #[tokio::test]
    async fn threshold_is_inclusive() {
        let h = harness().await;
        h.conn.add_member(GUILD, 1, &[]).await;
        h.store.link_account(MemberId::new(1), "acc-1").await;
        h.balances.set("acc-1", stanz(100.0)).await;

        let _ = h.reconciler.run_cycle(BotId::new(1)).await;
        assert!(h.conn.roles_of(GUILD, 1).await.contains("whale"));
    }

    #[tokio::test]
    async fn failing_member_does_not_stop_cycle() {
        let h = harness().await;
        h.conn.add_member(GUILD, 1, &[]).await;
        h.conn.add_member(GUILD, 2, &[]).await;
        h.store.link_account(MemberId::new(1), "missing").await;
        h.store.link_account(MemberId::new(2), "acc-2").await;
        h.balances.set("acc-2", stanz(500.0)).await;

        let Ok(report) = h.reconciler.run_cycle(BotId::new(1)).await else {
            panic!("cycle should run");
        };
        assert_eq!(report.errors, 1);
        assert!(h.conn.roles_of(GUILD, 2).await.contains("whale"));
    }

    #[tokio::test]
    async fn manual_reconcile_surfaces_errors() {
        let h = harness().await;
        h.conn.add_member(GUILD, 1, &[]).await;
        h.store.link_account(MemberId::new(1), "missing").await;

        let result = h.reconciler.reconcile_member(BotId::new(1), MemberId::new(1)).await;
        assert!(matches!(
            result,
            Err(BotError::Platform(PlatformError::NotFound(_)))
        ));

        let unknown = h.reconciler.reconcile_member(BotId::new(1), MemberId::new(9)).await;
        assert!(matches!(unknown, Err(BotError::NotFound(_))));
    }

    #[tokio::test]
    async fn manual_reconcile_updates_one_member() {
        let h = harness().await;
        h.conn.add_member(GUILD, 1, &[]).await;
        h.conn.add_member(GUILD, 2, &[]).await;
        h.store.link_account(MemberId::new(1), "acc-1").await;
        h.store.link_account(MemberId::new(2), "acc-2").await;
        h.balances.set("acc-1", stanz(200.0)).await;
        h.balances.set("acc-2", stanz(200.0)).await;

        let Ok(report) = h.reconciler.reconcile_member(BotId::new(1), MemberId::new(1)).await else {
            panic!("member should reconcile");
        };
        assert_eq!(report.members, 1);
        assert!(h.conn.roles_of(GUILD, 1).await.contains("whale"));
        assert!(!h.conn.roles_of(GUILD, 2).await.contains("whale"));
    }

    #[tokio::test]
    async fn unknown_bot_is_not_connected() {
        let h = harness().await;
        let result = h.reconciler.run_cycle(BotId::new(42)).await;
        assert!(matches!(result, Err(BotError::NotConnected(_))));
    }
}
