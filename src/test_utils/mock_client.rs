//! Scriptable in-memory implementation of the upstream filter RPC family.

use std::collections::{HashMap, VecDeque};

use alloy::rpc::types::Log;
use parking_lot::Mutex;

use crate::{
    VirtualFilterError,
    query::LogQuery,
    types::{FilterChanges, FilterId, FilterKind},
    upstream::FilterRpc,
};

#[derive(Debug)]
struct MockFilter {
    kind: FilterKind,
    query: Option<LogQuery>,
    queue: VecDeque<FilterChanges>,
}

#[derive(Debug, Default)]
struct MockInner {
    next_id: u64,
    chain_id: u64,
    head: u64,
    filters: HashMap<FilterId, MockFilter>,
    history: Vec<Log>,
    calls: Vec<&'static str>,
    fail_next: Option<VirtualFilterError>,
}

/// A fake full node for driving the proxy layer in tests.
///
/// Filters behave like the real thing: installed log filters accumulate
/// pushed logs matching their query, `get_filter_changes` drains the
/// accumulation, and dropped filters answer with filter-not-found. Every
/// RPC call is recorded for assertions.
#[derive(Debug)]
pub struct MockFilterClient {
    url: String,
    inner: Mutex<MockInner>,
}

impl MockFilterClient {
    /// Creates a node reachable at `url` with the given chain id.
    #[must_use]
    pub fn new(url: &str, chain_id: u64) -> Self {
        Self {
            url: url.to_string(),
            inner: Mutex::new(MockInner { next_id: 1, chain_id, ..MockInner::default() }),
        }
    }

    /// Sets the head block number reported by `eth_blockNumber`.
    pub fn set_head(&self, head: u64) {
        self.inner.lock().head = head;
    }

    /// Makes logs visible to the node: they are appended to the change
    /// queue of every installed log filter whose query matches (the node
    /// pre-filters by query), and to the node's log history served by
    /// `eth_getLogs`.
    pub fn push_logs(&self, logs: Vec<Log>) {
        let mut inner = self.inner.lock();
        for filter in inner.filters.values_mut() {
            if !filter.kind.is_log() {
                continue;
            }
            let matching: Vec<Log> = logs
                .iter()
                .filter(|log| filter.query.as_ref().is_none_or(|query| query.matches(log)))
                .cloned()
                .collect();
            if !matching.is_empty() {
                filter.queue.push_back(FilterChanges::Logs(matching));
            }
        }
        inner.history.extend(logs);
    }

    /// Appends a raw change set to one filter's queue, bypassing query
    /// matching. Use to emulate an upstream filter broader than the
    /// client's query.
    pub fn push_changes(&self, id: FilterId, changes: FilterChanges) {
        if let Some(filter) = self.inner.lock().filters.get_mut(&id) {
            filter.queue.push_back(changes);
        }
    }

    /// Forgets a filter, as a node restart would. Later calls referencing
    /// it answer with filter-not-found.
    pub fn drop_filter(&self, id: FilterId) {
        self.inner.lock().filters.remove(&id);
    }

    /// Fails the next filter RPC call with `error`.
    pub fn fail_next(&self, error: VirtualFilterError) {
        self.inner.lock().fail_next = Some(error);
    }

    /// True if the filter is still installed on the node.
    #[must_use]
    pub fn has_filter(&self, id: FilterId) -> bool {
        self.inner.lock().filters.contains_key(&id)
    }

    /// Number of filters currently installed.
    #[must_use]
    pub fn filter_count(&self) -> usize {
        self.inner.lock().filters.len()
    }

    /// Methods called so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<&'static str> {
        self.inner.lock().calls.clone()
    }

    /// Number of times `method` was called.
    #[must_use]
    pub fn call_count(&self, method: &str) -> usize {
        self.inner.lock().calls.iter().filter(|name| **name == method).count()
    }

    fn begin(&self, method: &'static str) -> Result<(), VirtualFilterError> {
        let mut inner = self.inner.lock();
        inner.calls.push(method);
        match inner.fail_next.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn install(
        &self,
        method: &'static str,
        kind: FilterKind,
        query: Option<LogQuery>,
    ) -> Result<FilterId, VirtualFilterError> {
        self.begin(method)?;
        let mut inner = self.inner.lock();
        let id = FilterId::from(inner.next_id);
        inner.next_id += 1;
        inner.filters.insert(id, MockFilter { kind, query, queue: VecDeque::new() });
        Ok(id)
    }
}

impl FilterRpc for MockFilterClient {
    fn node_url(&self) -> &str {
        &self.url
    }

    async fn chain_id(&self) -> Result<u64, VirtualFilterError> {
        self.begin("eth_chainId")?;
        Ok(self.inner.lock().chain_id)
    }

    async fn block_number(&self) -> Result<u64, VirtualFilterError> {
        self.begin("eth_blockNumber")?;
        Ok(self.inner.lock().head)
    }

    async fn new_log_filter(&self, query: &LogQuery) -> Result<FilterId, VirtualFilterError> {
        self.install("eth_newFilter", FilterKind::Log, Some(query.clone()))
    }

    async fn new_block_filter(&self) -> Result<FilterId, VirtualFilterError> {
        self.install("eth_newBlockFilter", FilterKind::Block, None)
    }

    async fn new_pending_transaction_filter(&self) -> Result<FilterId, VirtualFilterError> {
        self.install("eth_newPendingTransactionFilter", FilterKind::PendingTxn, None)
    }

    async fn uninstall_filter(&self, id: FilterId) -> Result<bool, VirtualFilterError> {
        self.begin("eth_uninstallFilter")?;
        Ok(self.inner.lock().filters.remove(&id).is_some())
    }

    async fn get_filter_changes(&self, id: FilterId) -> Result<FilterChanges, VirtualFilterError> {
        self.begin("eth_getFilterChanges")?;
        let mut inner = self.inner.lock();
        let filter = inner.filters.get_mut(&id).ok_or(VirtualFilterError::FilterNotFound)?;

        let mut logs: Vec<Log> = Vec::new();
        let mut hashes = Vec::new();
        while let Some(changes) = filter.queue.pop_front() {
            match changes {
                FilterChanges::Logs(batch) => logs.extend(batch),
                FilterChanges::Hashes(batch) => hashes.extend(batch),
            }
        }

        if filter.kind.is_log() {
            Ok(FilterChanges::Logs(logs))
        } else {
            Ok(FilterChanges::Hashes(hashes))
        }
    }

    async fn get_filter_logs(&self, id: FilterId) -> Result<Vec<Log>, VirtualFilterError> {
        self.begin("eth_getFilterLogs")?;
        let inner = self.inner.lock();
        let filter = inner.filters.get(&id).ok_or(VirtualFilterError::FilterNotFound)?;
        let query = filter.query.clone().unwrap_or_default();
        Ok(inner.history.iter().filter(|log| query.matches(log)).cloned().collect())
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>, VirtualFilterError> {
        self.begin("eth_getLogs")?;
        let inner = self.inner.lock();
        Ok(inner.history.iter().filter(|log| query.matches(log)).cloned().collect())
    }
}
