//! Startup resolution of the [`ChainContext`].

use tracing::{error, info, instrument};

use crate::error::{IndexerError, IndexerResult};
use crate::models::ChainContext;
use crate::ports::{ChainClient, Repositories};

/// Resolve the chain context once at startup.
///
/// Verifies the node serves `expected_chain_id` (when configured), reads the
/// bond denomination and resolves the chain number from the `chains` table.
#[instrument(skip(client, repositories))]
pub async fn resolve_context<C, R>(
    client: &C,
    repositories: &R,
    expected_chain_id: Option<&str>,
    genesis_height: u64,
) -> IndexerResult<ChainContext>
where
    C: ChainClient + ?Sized,
    R: Repositories + ?Sized,
{
    let status = client.status().await?;

    if let Some(expected) = expected_chain_id
        && expected != status.chain_id
    {
        error!(
            connected = %status.chain_id,
            expected = %expected,
            "❌ Chain mismatch! Node serves a different chain"
        );
        return Err(IndexerError::ChainMismatch {
            connected: status.chain_id,
            expected: expected.to_string(),
        });
    }

    if status.earliest_height > genesis_height {
        return Err(IndexerError::ConfigError(format!(
            "node history starts at {} but genesis height is {genesis_height}",
            status.earliest_height
        )));
    }

    let bond_denom = client.get_bond_denom().await?;
    let chain_num = repositories.chains().ensure_chain(&status.chain_id).await?;

    info!(
        chain = %status.chain_id,
        chain_num,
        denom = %bond_denom,
        "🔗 Chain context resolved"
    );

    Ok(ChainContext {
        chain_id: status.chain_id,
        chain_num,
        bond_denom,
        genesis_height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeChainClient, InMemoryRepositories};

    #[tokio::test]
    async fn resolves_context_for_matching_chain() {
        let chain = FakeChainClient::with_heights(1, 5);
        let repos = InMemoryRepositories::new();
        let ctx = resolve_context(&chain, &repos, Some("testchain-1"), 1)
            .await
            .unwrap();
        assert_eq!(ctx.chain_id, "testchain-1");
        assert_eq!(ctx.bond_denom, "stake");
        assert_eq!(ctx.chain_num, 1);
    }

    // Test critique: un mauvais chain-id est fatal
    #[tokio::test]
    async fn mismatched_chain_is_fatal() {
        let chain = FakeChainClient::with_heights(1, 5);
        let repos = InMemoryRepositories::new();
        let err = resolve_context(&chain, &repos, Some("cosmoshub-4"), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::ChainMismatch { .. }));
    }
}
