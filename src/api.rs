//! Client-facing filter API: proxies the standard event-filter RPC family
//! through delegated upstream filters.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use alloy::rpc::types::Log;
use tokio::time::sleep;
use tracing::{debug, info, trace};

use crate::{
    VirtualFilterError,
    ingest::LogStore,
    query::LogQuery,
    registry::{FilterRecord, FilterRegistry},
    system::FilterSystem,
    types::{DelegateInfo, FilterChanges, FilterId, FilterKind},
    upstream::{ClientPool, FilterRpc},
};

/// Proxy layer for client filters.
///
/// Every operation takes the node URL the frontend router selected for this
/// call. Once a filter exists, its delegate node is sticky: the filter state
/// lives on the node that created it, so later calls keep using that node
/// even when the router rehashes the client elsewhere.
///
/// Construction spawns the TTL reaper, which expires filters idle for
/// longer than the configured TTL and cascades delegate uninstalls.
pub struct FilterApi<C, S> {
    system: Arc<FilterSystem<C, S>>,
    registry: Arc<FilterRegistry>,
    clients: ClientPool<C>,
    filter_ttl: Duration,
}

impl<C, S> std::fmt::Debug for FilterApi<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterApi")
            .field("filter_ttl", &self.filter_ttl)
            .finish_non_exhaustive()
    }
}

impl<C: FilterRpc, S: LogStore> FilterApi<C, S> {
    /// Creates the facade and starts the TTL reaper.
    #[must_use]
    pub fn new(system: Arc<FilterSystem<C, S>>, clients: ClientPool<C>) -> Arc<Self> {
        let filter_ttl = system.config().filter_ttl;
        let api = Arc::new(Self {
            registry: Arc::new(FilterRegistry::new()),
            clients,
            filter_ttl,
            system,
        });

        ReapTask {
            registry: Arc::downgrade(&api.registry),
            system: Arc::downgrade(&api.system),
            ttl: filter_ttl,
        }
        .spawn();

        api
    }

    /// The directory of live client filters.
    #[must_use]
    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    /// Creates a proxy block filter on the node at `node_url`.
    ///
    /// # Errors
    ///
    /// Proxies upstream failures.
    pub async fn new_block_filter(&self, node_url: &str) -> Result<FilterId, VirtualFilterError> {
        let client = self.clients.load_or_connect(node_url).await?;
        let fid = client.new_block_filter().await?;
        self.install(FilterKind::Block, fid, node_url, None)
    }

    /// Creates a proxy pending-transaction filter on the node at `node_url`.
    ///
    /// # Errors
    ///
    /// Proxies upstream failures.
    pub async fn new_pending_transaction_filter(
        &self,
        node_url: &str,
    ) -> Result<FilterId, VirtualFilterError> {
        let client = self.clients.load_or_connect(node_url).await?;
        let fid = client.new_pending_transaction_filter().await?;
        self.install(FilterKind::PendingTxn, fid, node_url, None)
    }

    /// Creates a delegated log filter on the node at `node_url`.
    ///
    /// # Errors
    ///
    /// Proxies upstream failures.
    pub async fn new_log_filter(
        &self,
        node_url: &str,
        query: LogQuery,
    ) -> Result<FilterId, VirtualFilterError> {
        let client = self.clients.load_or_connect(node_url).await?;
        let fid = self.system.new_filter(client, &query).await?;
        self.install(FilterKind::Log, fid, node_url, Some(query))
    }

    /// Removes the filter with the given id. Returns `false` when the id is
    /// unknown; a second call for the same id issues no upstream request.
    ///
    /// # Errors
    ///
    /// Proxies upstream failures from the cascade.
    pub async fn uninstall_filter(
        &self,
        node_url: &str,
        id: FilterId,
    ) -> Result<bool, VirtualFilterError> {
        let Some(record) = self.registry.remove(id) else {
            return Ok(false);
        };

        let delegate_url = self.sticky_delegate("eth_uninstallFilter", id, &record, node_url);

        if record.kind.is_log() {
            return Ok(self.system.uninstall_filter(record.delegate.fid).await);
        }

        let client = self.clients.load_or_connect(&delegate_url).await?;
        client.uninstall_filter(record.delegate.fid).await
    }

    /// Returns all logs matching the filter's query, not just changes since
    /// the last poll. The result is always a list; "no logs" is empty.
    ///
    /// # Errors
    ///
    /// [`VirtualFilterError::FilterNotFound`] for unknown ids or non-log
    /// filters; the local record is removed eagerly when the upstream
    /// reports the delegate gone.
    pub async fn get_filter_logs(
        &self,
        node_url: &str,
        id: FilterId,
    ) -> Result<Vec<Log>, VirtualFilterError> {
        let record = self.registry.get(id).ok_or(VirtualFilterError::FilterNotFound)?;
        if !record.kind.is_log() {
            return Err(VirtualFilterError::FilterNotFound);
        }

        // The stub holds the originating node's client, so honoring the
        // sticky rule here is observation plus routing to the system.
        let _ = self.sticky_delegate("eth_getFilterLogs", id, &record, node_url);

        match self.system.get_filter_logs(record.delegate.fid).await {
            Err(error) if error.is_filter_not_found() => {
                let _ = self.registry.remove(id);
                Err(error)
            }
            other => other,
        }
    }

    /// Returns the changes accumulated for the filter since the last call.
    /// Refreshes the filter's idle timer.
    ///
    /// # Errors
    ///
    /// [`VirtualFilterError::FilterNotFound`] for unknown ids; the local
    /// record is removed eagerly when the upstream reports the delegate
    /// gone. Upstream errors are proxied.
    pub async fn get_filter_changes(
        &self,
        node_url: &str,
        id: FilterId,
    ) -> Result<FilterChanges, VirtualFilterError> {
        let record = self.registry.get(id).ok_or(VirtualFilterError::FilterNotFound)?;

        let delegate_url = self.sticky_delegate("eth_getFilterChanges", id, &record, node_url);

        self.registry.touch(id);

        let result = if record.kind.is_log() {
            self.system.get_filter_changes(record.delegate.fid).await
        } else {
            let client = self.clients.load_or_connect(&delegate_url).await?;
            client.get_filter_changes(record.delegate.fid).await
        };

        match result {
            Err(error) if error.is_filter_not_found() => {
                let _ = self.registry.remove(id);
                Err(error)
            }
            other => other,
        }
    }

    fn install(
        &self,
        kind: FilterKind,
        fid: FilterId,
        node_url: &str,
        query: Option<LogQuery>,
    ) -> Result<FilterId, VirtualFilterError> {
        let id = FilterId::random();
        self.registry.add(id, FilterRecord::new(kind, DelegateInfo::new(fid, node_url), query))?;
        debug!(filter_id = %id, delegate_id = %fid, node = node_url, ?kind, "Installed proxy filter");
        Ok(id)
    }

    /// Applies the sticky delegate rule: when the routed node differs from
    /// the filter's delegate node, record the observation and use the
    /// delegate anyway, for data consistency.
    fn sticky_delegate(
        &self,
        operation: &'static str,
        id: FilterId,
        record: &FilterRecord,
        routed_url: &str,
    ) -> String {
        if !record.is_delegate_node(routed_url) {
            info!(
                operation,
                filter_id = %id,
                routed_node = routed_url,
                delegate_node = %record.delegate.node_url,
                "Delegate full node switched over"
            );
        }
        record.delegate.node_url.clone()
    }
}

/// Periodic task expiring idle filters and cascading delegate uninstalls.
///
/// Holds weak references so a dropped facade stops the task on its next
/// tick.
struct ReapTask<C, S> {
    registry: Weak<FilterRegistry>,
    system: Weak<FilterSystem<C, S>>,
    ttl: Duration,
}

impl<C: FilterRpc, S: LogStore> ReapTask<C, S> {
    fn spawn(self) {
        tokio::spawn(async move {
            let period = self.ttl / 2;
            loop {
                sleep(period).await;

                let (Some(registry), Some(system)) =
                    (self.registry.upgrade(), self.system.upgrade())
                else {
                    break;
                };

                let mut delegates = Vec::new();
                let reaped = registry.reap_older_than(self.ttl, |id, record| {
                    if record.kind.is_log() {
                        delegates.push((id, record.delegate.fid));
                    }
                });

                if reaped > 0 {
                    debug!(reaped, "Expired idle filters");
                }

                for (id, fid) in delegates {
                    let removed = system.uninstall_filter(fid).await;
                    trace!(
                        filter_id = %id,
                        delegate_id = %fid,
                        removed,
                        "Cascaded delegate uninstall for expired filter"
                    );
                }
            }
        });
    }
}
