//! The virtual filter system: creates delegate log filters on upstream
//! nodes, keeps their poll loops running, and serves log reads from the
//! store when it can.

use std::{collections::HashMap, sync::Arc};

use alloy::rpc::types::Log;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    VirtualFilterError,
    config::VirtualFilterConfig,
    ingest::{LogIngestor, LogStore},
    proxy::ProxyStub,
    query::{LogQuery, QueryKind, QueryPlanner, filter_logs},
    types::{FilterChanges, FilterId},
    upstream::{FilterRpc, node_name},
};

/// Creates proxy log filters on full nodes and continuously polls their
/// event logs into the read-through store, so filter reads are fast and
/// cheap on the upstream.
pub struct FilterSystem<C, S> {
    config: VirtualFilterConfig,
    planner: QueryPlanner,
    store: Arc<S>,
    ingestor: LogIngestor<S>,
    /// Node name -> live stub. Constructor runs under the lock so two
    /// concurrent installs never create two stubs for one node.
    node_proxies: Mutex<HashMap<String, Arc<ProxyStub<C, S>>>>,
    /// Upstream filter id -> owning stub.
    filter_proxies: SyncMutex<HashMap<FilterId, Arc<ProxyStub<C, S>>>>,
}

impl<C, S> std::fmt::Debug for FilterSystem<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterSystem").field("config", &self.config).finish_non_exhaustive()
    }
}

impl<C: FilterRpc, S: LogStore> FilterSystem<C, S> {
    /// Creates a filter system writing polled logs to `store`.
    #[must_use]
    pub fn new(config: VirtualFilterConfig, store: Arc<S>) -> Arc<Self> {
        let planner = QueryPlanner::new(
            config.max_query_span,
            config.max_addresses,
            config.max_topic_set_cardinality,
        );
        Arc::new(Self {
            planner,
            store: store.clone(),
            ingestor: LogIngestor::new(store),
            node_proxies: Mutex::new(HashMap::new()),
            filter_proxies: SyncMutex::new(HashMap::new()),
            config,
        })
    }

    /// The configuration this system runs with.
    #[must_use]
    pub fn config(&self) -> &VirtualFilterConfig {
        &self.config
    }

    /// Creates a delegate log filter on `client`'s node and returns the
    /// upstream filter id.
    ///
    /// # Errors
    ///
    /// Propagates the upstream installation failure.
    pub async fn new_filter(
        &self,
        client: Arc<C>,
        query: &LogQuery,
    ) -> Result<FilterId, VirtualFilterError> {
        let stub = self.load_or_new_proxy(client).await;
        let fid = stub.clone().new_filter(query).await?;
        self.filter_proxies.lock().insert(fid, stub);
        Ok(fid)
    }

    /// Uninstalls a delegate log filter. Returns whether anything was
    /// removed.
    pub async fn uninstall_filter(&self, id: FilterId) -> bool {
        let Some(stub) = self.filter_proxies.lock().remove(&id) else {
            return false;
        };
        stub.uninstall_filter(id).await
    }

    /// Returns the logs accumulated for the delegate filter since the last
    /// call, re-filtered against the query the filter was installed with.
    ///
    /// # Errors
    ///
    /// [`VirtualFilterError::FilterNotFound`] if the delegate is gone (the
    /// routing entry is removed eagerly); upstream errors are proxied.
    pub async fn get_filter_changes(
        &self,
        id: FilterId,
    ) -> Result<FilterChanges, VirtualFilterError> {
        let (stub, query) = self.load_filter_context(id)?;

        let logs = match stub.get_filter_changes(id).await {
            Ok(logs) => logs,
            Err(error) => {
                if error.is_filter_not_found() {
                    self.filter_proxies.lock().remove(&id);
                }
                return Err(error);
            }
        };

        // The delegate filter should already match, but the stored query is
        // authoritative for what this client asked for.
        Ok(FilterChanges::Logs(filter_logs(logs, &query)))
    }

    /// Returns all logs matching the delegate filter's query, serving from
    /// the store when the range is fully persisted and falling through to
    /// the upstream node otherwise.
    ///
    /// # Errors
    ///
    /// [`VirtualFilterError::FilterNotFound`] for unknown delegates,
    /// [`VirtualFilterError::InvalidFilter`] for queries failing
    /// classification or validation, and proxied upstream errors.
    pub async fn get_filter_logs(&self, id: FilterId) -> Result<Vec<Log>, VirtualFilterError> {
        let (stub, query) = self.load_filter_context(id)?;
        let client = stub.client();

        let kind = self.planner.classify(&query);
        if kind == QueryKind::Invalid {
            return Err(VirtualFilterError::invalid(
                "cannot filter by block hash and block range at once",
            ));
        }

        let chain_id = client.chain_id().await?;
        let floor = self.config.hardfork_floor(chain_id);

        let head =
            if query.needs_head_resolution() { client.block_number().await? } else { 0 };
        let normalized = self.planner.normalize(&query, head, floor);

        // Ranges ending at or below the hardfork floor hold no servable
        // logs; answer before validation so the floor clamp cannot turn
        // them into inverted-range errors.
        if kind != QueryKind::ByBlockHash
            && normalized.to_number().is_some_and(|to| to <= floor)
        {
            return Ok(Vec::new());
        }

        self.planner.validate(&normalized)?;

        if let Some(logs) = self.try_store_logs(kind, &normalized).await {
            debug!(filter_id = %id, log_count = logs.len(), "Served filter logs from store");
            return Ok(logs);
        }

        client.get_logs(&normalized).await
    }

    /// Attempts the store read path; `None` means the caller should fall
    /// through to the upstream node.
    async fn try_store_logs(&self, kind: QueryKind, query: &LogQuery) -> Option<Vec<Log>> {
        let servable = match kind {
            QueryKind::ByBlockHash => {
                let hash = query.block_hash?;
                match self.store.get_block_summary_by_hash(hash).await {
                    Ok(summary) => summary.is_some(),
                    Err(error) => {
                        warn!(error = %error, "Store block lookup failed, falling through to upstream");
                        false
                    }
                }
            }
            _ => {
                let (from, to) = (query.from_number()?, query.to_number()?);
                match self.store.get_block_epoch_range().await {
                    Ok(Some((min, max))) => from >= min && to <= max,
                    Ok(None) => false,
                    Err(error) => {
                        warn!(error = %error, "Store range lookup failed, falling through to upstream");
                        false
                    }
                }
            }
        };

        if !servable {
            return None;
        }

        match self.store.get_logs(query).await {
            Ok(logs) => Some(logs),
            Err(error) => {
                warn!(error = %error, "Store log read failed, falling through to upstream");
                None
            }
        }
    }

    fn load_filter_context(
        &self,
        id: FilterId,
    ) -> Result<(Arc<ProxyStub<C, S>>, LogQuery), VirtualFilterError> {
        let stub = self
            .filter_proxies
            .lock()
            .get(&id)
            .cloned()
            .ok_or(VirtualFilterError::FilterNotFound)?;

        // A closed stub (or a cursor it dropped) invalidates the route.
        if stub.is_closed() {
            self.filter_proxies.lock().remove(&id);
            return Err(VirtualFilterError::FilterNotFound);
        }
        let Some(query) = stub.get_filter_context(id) else {
            self.filter_proxies.lock().remove(&id);
            return Err(VirtualFilterError::FilterNotFound);
        };

        Ok((stub, query))
    }

    async fn load_or_new_proxy(&self, client: Arc<C>) -> Arc<ProxyStub<C, S>> {
        let name = node_name(client.node_url());
        let mut proxies = self.node_proxies.lock().await;

        if let Some(stub) = proxies.get(&name)
            && !stub.is_closed()
        {
            return stub.clone();
        }

        debug!(node = %name, "Creating proxy stub");
        let stub = ProxyStub::new(client, self.ingestor.clone(), &self.config);
        proxies.insert(name, stub.clone());
        stub
    }
}
