//! Account snapshot refresh.
//!
//! Snapshots are not a ledger: after a height commits, every address with
//! bank activity is re-queried and its row overwritten. Failures are logged
//! and skipped.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument, warn};

use crate::error::{ChainResult, IndexerResult};
use crate::metrics::record_poller_refresh;
use crate::models::{AccountSnapshot, ChainContext, address, sum_denom};
use crate::ports::{ChainClient, Repositories};

pub struct AccountRefresher<C: ChainClient, R: Repositories> {
    client: Arc<C>,
    repositories: Arc<R>,
}

impl<C: ChainClient, R: Repositories> AccountRefresher<C, R> {
    pub fn new(client: Arc<C>, repositories: Arc<R>) -> Self {
        Self {
            client,
            repositories,
        }
    }

    /// Refresh the snapshot of every address. Returns how many were stored.
    #[instrument(skip_all, fields(addresses = addresses.len()))]
    pub async fn refresh(&self, ctx: &ChainContext, addresses: &[String]) -> IndexerResult<usize> {
        if addresses.is_empty() {
            return Ok(0);
        }

        let operators: HashSet<String> = self
            .repositories
            .validators()
            .list(ctx.chain_num)
            .await?
            .into_iter()
            .map(|v| v.operator_address)
            .collect();

        let mut snapshots = Vec::with_capacity(addresses.len());
        for address in addresses {
            match self.snapshot(ctx, address, &operators).await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    warn!(address = %address, error = %e, "⚠️  Account refresh failed");
                    record_poller_refresh("accounts", "error");
                }
            }
        }

        self.repositories
            .accounts()
            .upsert_snapshots(ctx.chain_num, &snapshots)
            .await?;
        record_poller_refresh("accounts", "ok");
        debug!(stored = snapshots.len(), "Account snapshots refreshed");
        Ok(snapshots.len())
    }

    async fn snapshot(
        &self,
        ctx: &ChainContext,
        account: &str,
        operators: &HashSet<String>,
    ) -> ChainResult<AccountSnapshot> {
        let denom = ctx.bond_denom.as_str();

        let available = sum_denom(&self.client.get_balances(account).await?, denom);
        let delegated: u128 = self
            .client
            .get_delegator_delegations(account)
            .await?
            .iter()
            .filter(|d| d.balance.denom == denom)
            .filter_map(|d| d.balance.integer_amount())
            .sum();
        let unbonding = sum_denom(&self.client.get_unbonding_delegations(account).await?, denom);
        let rewards = sum_denom(&self.client.get_total_rewards(account).await?, denom);

        let commission = match address::account_to_operator(account) {
            Ok(operator) if operators.contains(&operator) => {
                sum_denom(&self.client.get_validator_commission(&operator).await?, denom)
            }
            _ => 0,
        };

        Ok(AccountSnapshot {
            address: account.to_string(),
            available: available.to_string(),
            delegated: delegated.to_string(),
            unbonding: unbonding.to_string(),
            rewards: rewards.to_string(),
            commission: commission.to_string(),
            updated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Coin;
    use crate::ports::Delegation;
    use crate::testing::{FakeChainClient, InMemoryRepositories, account_address, sample_context};

    #[tokio::test]
    async fn snapshot_sums_bond_denom_only() {
        let chain = FakeChainClient::with_heights(1, 3);
        let alice = account_address(9);
        chain.set_balances(
            &alice,
            vec![Coin::new("stake", "100"), Coin::new("uother", "7")],
        );
        chain.set_delegations(
            &alice,
            vec![
                Delegation {
                    validator_address: "v1".into(),
                    balance: Coin::new("stake", "40"),
                },
                Delegation {
                    validator_address: "v2".into(),
                    balance: Coin::new("stake", "2"),
                },
            ],
        );
        chain.set_rewards(&alice, vec![Coin::new("stake", "3.75")]);

        let repos = Arc::new(InMemoryRepositories::new());
        let refresher = AccountRefresher::new(Arc::new(chain), Arc::clone(&repos));
        let ctx = sample_context();
        let stored = refresher.refresh(&ctx, &[alice.clone()]).await.unwrap();
        assert_eq!(stored, 1);

        let snap = repos
            .accounts()
            .get_snapshot(ctx.chain_num, &alice)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snap.available, "100");
        assert_eq!(snap.delegated, "42");
        assert_eq!(snap.rewards, "3");
        assert_eq!(snap.commission, "0");
    }
}
