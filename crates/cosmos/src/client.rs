//! HTTP client for a CometBFT node and its Cosmos query gateway.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, trace};
use url::Url;

use chronicle_core::error::{ChainError, ChainResult};
use chronicle_core::models::{Coin, Proposal, ProposalStatus};
use chronicle_core::ports::{
    ChainClient, Delegation, NodeStatus, RawBlock, RawTx, StakingValidator, ValidatorPage,
};

use crate::codec::Captured;
use crate::query::{
    BalancesPage, CommissionResponse, DelegationsPage, GetTxResponse, Paged, ProposalResponse,
    ProposalsPage, RewardsResponse, StakingParamsResponse, UnbondingPage, ValidatorsPage,
};
use crate::rpc::{BlockResult, RpcResponse, StatusResult, ValidatorsResult, is_height_unavailable};

/// Header selecting the state height of a gateway query.
const BLOCK_HEIGHT_HEADER: &str = "x-cosmos-block-height";

/// Page size for paginated gateway queries.
const PAGE_LIMIT: u32 = 200;

/// Configuration for the Cosmos client.
#[derive(Debug, Clone)]
pub struct CosmosClientConfig {
    /// CometBFT RPC URL (e.g., "http://localhost:26657").
    pub rpc_url: String,
    /// Query gateway URL (e.g., "http://localhost:1317").
    pub api_url: String,
    /// Timeout applied to every request.
    pub request_timeout: Duration,
}

impl Default for CosmosClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:26657".to_string(),
            api_url: "http://127.0.0.1:1317".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Cosmos client adapter implementing the ChainClient port.
///
/// Blocks, commits and validator sets come from the RPC endpoint;
/// transactions and module state come from the query gateway.
pub struct CosmosClient {
    http: Client,
    rpc_url: String,
    api_url: String,
    bond_denom: OnceLock<String>,
}

impl CosmosClient {
    /// Build a client. No request is made until the first call.
    #[instrument(skip_all, fields(rpc = %config.rpc_url, api = %config.api_url))]
    pub fn new(config: CosmosClientConfig) -> ChainResult<Self> {
        let rpc_url = base_url(&config.rpc_url)?;
        let api_url = base_url(&config.api_url)?;

        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;

        debug!("Client ready");

        Ok(Self {
            http,
            rpc_url,
            api_url,
            bond_denom: OnceLock::new(),
        })
    }

    /// Call a JSON-RPC method over the URI transport.
    async fn rpc<T: DeserializeOwned>(&self, method: &str, params: &[(&str, String)]) -> ChainResult<T> {
        let url = format!("{}/{}", self.rpc_url, method);
        trace!(method, ?params, "RPC call");

        // Errors come back as a JSON-RPC error object with a non-2xx status.
        let response = self
            .http
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;
        let status = response.status();

        let body: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| ChainError::DecodeError(format!("{method} ({status}): {e}")))?;
        body.into_result(method)
    }

    /// GET a gateway path, optionally pinned to a state height.
    async fn query<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
        height: Option<u64>,
    ) -> ChainResult<T> {
        let url = format!("{}{}", self.api_url, path);
        trace!(path, ?height, "Gateway query");

        let mut request = self.http.get(&url).query(params);
        if let Some(height) = height {
            request = request.header(BLOCK_HEIGHT_HEADER, height.to_string());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ChainError::QueryError {
                status: status.as_u16(),
                path: path.to_string(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ChainError::DecodeError(format!("{path}: {e}")))
    }

    /// Follow `pagination.next_key` until the last page.
    async fn collect_pages<P>(
        &self,
        path: &str,
        params: &[(&str, String)],
        height: Option<u64>,
    ) -> ChainResult<Vec<P::Item>>
    where
        P: Paged + DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut key: Option<String> = None;

        loop {
            let mut query = params.to_vec();
            query.push(("pagination.limit", PAGE_LIMIT.to_string()));
            if let Some(k) = &key {
                query.push(("pagination.key", k.clone()));
            }

            let page: P = self.query(path, &query, height).await?;
            let (batch, next) = page.into_page();
            items.extend(batch);

            match next {
                Some(next) => key = Some(next),
                None => return Ok(items),
            }
        }
    }
}

fn base_url(raw: &str) -> ChainResult<String> {
    let url = Url::parse(raw).map_err(|e| ChainError::ConnectionFailed(format!("{raw}: {e}")))?;
    Ok(url.as_str().trim_end_matches('/').to_string())
}

#[async_trait]
impl ChainClient for CosmosClient {
    async fn status(&self) -> ChainResult<NodeStatus> {
        let status: StatusResult = self.rpc("status", &[]).await?;
        Ok(status.into())
    }

    async fn get_block(&self, height: u64) -> ChainResult<RawBlock> {
        let result: Captured<BlockResult> = self
            .rpc("block", &[("height", height.to_string())])
            .await
            .map_err(|e| {
                if is_height_unavailable(&e) {
                    ChainError::BlockNotFound(height)
                } else {
                    e
                }
            })?;
        result.value.into_raw_block(result.source)
    }

    async fn get_tx(&self, hash: &str) -> ChainResult<RawTx> {
        let path = format!("/cosmos/tx/v1beta1/txs/{hash}");
        let response: Captured<GetTxResponse> =
            self.query(&path, &[], None).await.map_err(|e| match e {
                ChainError::QueryError { status: 404, .. } => {
                    ChainError::TxNotFound(hash.to_string())
                }
                ChainError::QueryError { ref message, .. } if message.contains("not found") => {
                    ChainError::TxNotFound(hash.to_string())
                }
                other => other,
            })?;
        Ok(response.value.into_raw_tx(response.source))
    }

    async fn get_validators_at_height(
        &self,
        height: u64,
        page: u32,
        per_page: u32,
    ) -> ChainResult<ValidatorPage> {
        let result: Captured<ValidatorsResult> = self
            .rpc(
                "validators",
                &[
                    ("height", height.to_string()),
                    ("page", page.to_string()),
                    ("per_page", per_page.to_string()),
                ],
            )
            .await?;
        Ok(result.value.into_page(result.source))
    }

    async fn get_bond_denom(&self) -> ChainResult<String> {
        if let Some(denom) = self.bond_denom.get() {
            return Ok(denom.clone());
        }
        let params: StakingParamsResponse =
            self.query("/cosmos/staking/v1beta1/params", &[], None).await?;
        let denom = params.bond_denom();
        let _ = self.bond_denom.set(denom.clone());
        Ok(denom)
    }

    async fn get_staking_validators(
        &self,
        height: Option<u64>,
    ) -> ChainResult<Vec<StakingValidator>> {
        self.collect_pages::<ValidatorsPage>("/cosmos/staking/v1beta1/validators", &[], height)
            .await
    }

    async fn get_proposals(&self) -> ChainResult<Vec<Proposal>> {
        let proposals = self
            .collect_pages::<ProposalsPage>("/cosmos/gov/v1beta1/proposals", &[], None)
            .await?;
        Ok(proposals.into_iter().map(|p| p.into_proposal()).collect())
    }

    async fn get_proposal(&self, id: u64) -> ChainResult<Proposal> {
        let path = format!("/cosmos/gov/v1beta1/proposals/{id}");
        let response: ProposalResponse = self.query(&path, &[], None).await?;
        Ok(response.proposal.into_proposal())
    }

    async fn get_proposals_by_status(&self, status: ProposalStatus) -> ChainResult<Vec<Proposal>> {
        let proposals = self
            .collect_pages::<ProposalsPage>(
                "/cosmos/gov/v1beta1/proposals",
                &[("proposal_status", status.as_str().to_string())],
                None,
            )
            .await?;
        Ok(proposals.into_iter().map(|p| p.into_proposal()).collect())
    }

    async fn get_balances(&self, address: &str) -> ChainResult<Vec<Coin>> {
        let path = format!("/cosmos/bank/v1beta1/balances/{address}");
        self.collect_pages::<BalancesPage>(&path, &[], None).await
    }

    async fn get_delegator_delegations(&self, address: &str) -> ChainResult<Vec<Delegation>> {
        let path = format!("/cosmos/staking/v1beta1/delegations/{address}");
        self.collect_pages::<DelegationsPage>(&path, &[], None).await
    }

    async fn get_unbonding_delegations(&self, address: &str) -> ChainResult<Vec<Coin>> {
        let path = format!("/cosmos/staking/v1beta1/delegators/{address}/unbonding_delegations");
        let sums = self.collect_pages::<UnbondingPage>(&path, &[], None).await?;
        let denom = self.get_bond_denom().await?;
        Ok(sums
            .into_iter()
            .map(|amount| Coin::new(denom.clone(), amount.to_string()))
            .collect())
    }

    async fn get_total_rewards(&self, address: &str) -> ChainResult<Vec<Coin>> {
        let path = format!("/cosmos/distribution/v1beta1/delegators/{address}/rewards");
        let response: RewardsResponse = self.query(&path, &[], None).await?;
        Ok(response.total())
    }

    async fn get_validator_commission(&self, operator: &str) -> ChainResult<Vec<Coin>> {
        let path = format!("/cosmos/distribution/v1beta1/validators/{operator}/commission");
        let response: CommissionResponse = self.query(&path, &[], None).await?;
        Ok(response.coins())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_drops_trailing_slash() {
        assert_eq!(base_url("http://node:26657/").unwrap(), "http://node:26657");
        assert_eq!(base_url("https://api.example.com/lcd/").unwrap(), "https://api.example.com/lcd");
    }

    #[test]
    fn invalid_url_is_rejected() {
        assert!(matches!(
            CosmosClient::new(CosmosClientConfig {
                rpc_url: "not a url".into(),
                ..Default::default()
            }),
            Err(ChainError::ConnectionFailed(_))
        ));
    }

    // Test critique: un noeud injoignable est une erreur transitoire, pas une panique
    #[tokio::test]
    async fn unreachable_node_is_a_connection_error() {
        let client = CosmosClient::new(CosmosClientConfig {
            rpc_url: "http://127.0.0.1:1".into(),
            api_url: "http://127.0.0.1:1".into(),
            request_timeout: Duration::from_millis(500),
        })
        .unwrap();

        assert!(matches!(
            client.status().await,
            Err(ChainError::ConnectionFailed(_))
        ));
        assert!(matches!(
            client.get_bond_denom().await,
            Err(ChainError::ConnectionFailed(_))
        ));
    }
}
