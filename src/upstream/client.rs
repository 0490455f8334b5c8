//! Upstream transport seam: the filter RPC family a full node must provide,
//! and the alloy-backed HTTP implementation with retry and timeout.

use std::time::Duration;

use alloy::{
    primitives::U64,
    providers::{Provider, RootProvider},
    rpc::{
        json_rpc::{RpcRecv, RpcSend},
        types::Log,
    },
    transports::{RpcError, TransportErrorKind},
};
use backon::{ExponentialBuilder, Retryable};
use tokio::{sync::OnceCell, time::timeout};
use tracing::debug;

use crate::{
    VirtualFilterError,
    config::VirtualFilterConfig,
    query::LogQuery,
    types::{FilterChanges, FilterId},
};

/// The filter RPC family exposed by a backend full node.
///
/// Implementations are internally safe for concurrent use; one client is
/// shared across every proxy stub bound to the same node.
pub trait FilterRpc: Send + Sync + 'static {
    /// The node URL this client talks to.
    fn node_url(&self) -> &str;

    /// The chain id, fetched once and cached.
    fn chain_id(&self) -> impl Future<Output = Result<u64, VirtualFilterError>> + Send;

    /// The current head block number.
    fn block_number(&self) -> impl Future<Output = Result<u64, VirtualFilterError>> + Send;

    /// Installs a log filter upstream and returns its id.
    fn new_log_filter(
        &self,
        query: &LogQuery,
    ) -> impl Future<Output = Result<FilterId, VirtualFilterError>> + Send;

    /// Installs a new-block filter upstream.
    fn new_block_filter(&self)
    -> impl Future<Output = Result<FilterId, VirtualFilterError>> + Send;

    /// Installs a pending-transaction filter upstream.
    fn new_pending_transaction_filter(
        &self,
    ) -> impl Future<Output = Result<FilterId, VirtualFilterError>> + Send;

    /// Uninstalls an upstream filter.
    fn uninstall_filter(
        &self,
        id: FilterId,
    ) -> impl Future<Output = Result<bool, VirtualFilterError>> + Send;

    /// Drains changes accumulated by an upstream filter since the last call.
    fn get_filter_changes(
        &self,
        id: FilterId,
    ) -> impl Future<Output = Result<FilterChanges, VirtualFilterError>> + Send;

    /// Returns all logs matching an upstream filter's query.
    fn get_filter_logs(
        &self,
        id: FilterId,
    ) -> impl Future<Output = Result<Vec<Log>, VirtualFilterError>> + Send;

    /// One-shot log query.
    fn get_logs(
        &self,
        query: &LogQuery,
    ) -> impl Future<Output = Result<Vec<Log>, VirtualFilterError>> + Send;
}

/// Alloy-backed HTTP client for one upstream node.
///
/// Every call runs under a per-call timeout and is retried with exponential
/// backoff on transport errors. JSON-RPC error responses (including "filter
/// not found") are returned immediately.
#[derive(Clone, Debug)]
pub struct NodeClient {
    url: String,
    provider: RootProvider,
    call_timeout: Duration,
    max_retries: usize,
    retry_min_delay: Duration,
    chain_id: OnceCell<u64>,
}

impl NodeClient {
    /// Creates a client for `url` with the config's timeout and retry
    /// settings.
    ///
    /// # Errors
    ///
    /// Returns [`VirtualFilterError::Upstream`] if the URL does not parse.
    pub fn new(url: &str, config: &VirtualFilterConfig) -> Result<Self, VirtualFilterError> {
        let parsed = url.parse().map_err(|error| {
            VirtualFilterError::from(TransportErrorKind::custom_str(&format!(
                "invalid node url {url}: {error}"
            )))
        })?;

        Ok(Self {
            url: url.to_string(),
            provider: RootProvider::new_http(parsed),
            call_timeout: config.call_timeout,
            max_retries: config.max_retries,
            retry_min_delay: config.retry_min_delay,
            chain_id: OnceCell::new(),
        })
    }

    fn retry_strategy(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_max_times(self.max_retries)
            .with_min_delay(self.retry_min_delay)
    }

    async fn request<Params, Resp>(
        &self,
        method: &'static str,
        params: Params,
    ) -> Result<Resp, VirtualFilterError>
    where
        Params: RpcSend + Clone,
        Resp: RpcRecv,
    {
        self.retry(method, || async {
            self.provider.client().request(method, params.clone()).await
        })
        .await
    }

    async fn request_noparams<Resp: RpcRecv>(
        &self,
        method: &'static str,
    ) -> Result<Resp, VirtualFilterError> {
        self.retry(method, || async { self.provider.client().request_noparams(method).await })
            .await
    }

    async fn retry<Resp, Call, Fut>(
        &self,
        method: &'static str,
        call: Call,
    ) -> Result<Resp, VirtualFilterError>
    where
        Call: Fn() -> Fut,
        Fut: Future<Output = Result<Resp, RpcError<TransportErrorKind>>>,
    {
        let outcome = timeout(
            self.call_timeout,
            call.retry(self.retry_strategy())
                .when(|error: &RpcError<TransportErrorKind>| {
                    matches!(error, RpcError::Transport(_))
                })
                .notify(|error: &RpcError<TransportErrorKind>, delay: Duration| {
                    debug!(method, error = %error, ?delay, "Upstream call failed, retrying");
                })
                .sleep(tokio::time::sleep),
        )
        .await;

        match outcome {
            Ok(result) => result.map_err(VirtualFilterError::from),
            Err(_) => Err(VirtualFilterError::from(TransportErrorKind::custom_str(&format!(
                "{method} timed out after {:?}",
                self.call_timeout
            )))),
        }
    }
}

impl FilterRpc for NodeClient {
    fn node_url(&self) -> &str {
        &self.url
    }

    async fn chain_id(&self) -> Result<u64, VirtualFilterError> {
        self.chain_id
            .get_or_try_init(|| async {
                let id: U64 = self.request_noparams("eth_chainId").await?;
                Ok(id.to::<u64>())
            })
            .await
            .copied()
    }

    async fn block_number(&self) -> Result<u64, VirtualFilterError> {
        let number: U64 = self.request_noparams("eth_blockNumber").await?;
        Ok(number.to::<u64>())
    }

    async fn new_log_filter(&self, query: &LogQuery) -> Result<FilterId, VirtualFilterError> {
        self.request("eth_newFilter", (query.clone(),)).await
    }

    async fn new_block_filter(&self) -> Result<FilterId, VirtualFilterError> {
        self.request_noparams("eth_newBlockFilter").await
    }

    async fn new_pending_transaction_filter(&self) -> Result<FilterId, VirtualFilterError> {
        self.request_noparams("eth_newPendingTransactionFilter").await
    }

    async fn uninstall_filter(&self, id: FilterId) -> Result<bool, VirtualFilterError> {
        self.request("eth_uninstallFilter", (id,)).await
    }

    async fn get_filter_changes(&self, id: FilterId) -> Result<FilterChanges, VirtualFilterError> {
        self.request("eth_getFilterChanges", (id,)).await
    }

    async fn get_filter_logs(&self, id: FilterId) -> Result<Vec<Log>, VirtualFilterError> {
        self.request("eth_getFilterLogs", (id,)).await
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>, VirtualFilterError> {
        self.request("eth_getLogs", (query.clone(),)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::{
        providers::mock::Asserter,
        rpc::client::RpcClient,
    };

    fn mocked_client(asserter: &Asserter) -> NodeClient {
        NodeClient {
            url: "http://localhost:8545".to_string(),
            provider: RootProvider::new(RpcClient::mocked(asserter.clone())),
            call_timeout: Duration::from_millis(500),
            max_retries: 0,
            retry_min_delay: Duration::ZERO,
            chain_id: OnceCell::new(),
        }
    }

    #[tokio::test]
    async fn chain_id_is_fetched_once_and_cached() {
        let asserter = Asserter::new();
        let client = mocked_client(&asserter);
        asserter.push_success(&U64::from(1030u64));

        assert_eq!(client.chain_id().await.unwrap(), 1030);
        // Second call must come from the cache; no response is queued.
        assert_eq!(client.chain_id().await.unwrap(), 1030);
    }

    #[tokio::test]
    async fn new_log_filter_returns_the_upstream_id() {
        let asserter = Asserter::new();
        let client = mocked_client(&asserter);
        asserter.push_success(&FilterId::from(0xfeedu64));

        let fid = client.new_log_filter(&LogQuery::new()).await.unwrap();

        assert_eq!(fid, FilterId::from(0xfeedu64));
    }

    #[tokio::test]
    async fn filter_not_found_response_maps_to_the_not_found_kind() {
        let asserter = Asserter::new();
        let client = mocked_client(&asserter);
        asserter.push_failure_msg("filter not found");

        let error = client.get_filter_changes(FilterId::from(1u64)).await.unwrap_err();

        assert!(error.is_filter_not_found());
    }
}
