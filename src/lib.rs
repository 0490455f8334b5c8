//! Log-filter virtualization layer for blockchain RPC frontends.
//!
//! Sits between RPC clients and a pool of backend full nodes, preserving
//! per-filter semantics of the standard event-filter API while:
//!
//! - multiplexing many client filters onto delegated upstream filters, one
//!   proxy stub per node ([`FilterSystem`], [`ProxyStub`]);
//! - continuously polling upstream change streams into a read-through log
//!   store ([`LogIngestor`], [`LogStore`]) for fast retrieval and reduced
//!   upstream load;
//! - pinning every filter to its originating node — the sticky delegate
//!   rule — so cursor state survives frontend routing changes
//!   ([`FilterApi`]);
//! - expiring idle filters on a TTL and cascading delegate uninstalls.
//!
//! # Example
//!
//! `MemoryStore` below ships behind the `test-utils` feature; production
//! deployments plug in their own [`LogStore`].
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use virtual_filter::{
//!     ClientPool, FilterApi, FilterSystem, LogQuery, VirtualFilterConfig,
//!     test_utils::MemoryStore,
//! };
//!
//! let config = VirtualFilterConfig::default().hardfork_block(1030, 36_935_000);
//! let clients = ClientPool::http(&config);
//! let system = FilterSystem::new(config, Arc::new(MemoryStore::new()));
//! let api = FilterApi::new(system, clients);
//!
//! let query = LogQuery::new().from_block(100u64).to_block(200u64);
//! let id = api.new_log_filter("http://node1:8545", query).await?;
//!
//! let changes = api.get_filter_changes("http://node1:8545", id).await?;
//! println!("{} new logs", changes.len());
//! ```

mod api;
mod config;
mod error;
mod ingest;
mod proxy;
mod query;
mod registry;
mod system;
mod types;
mod upstream;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use api::FilterApi;
pub use config::{
    DEFAULT_FILTER_TTL, DEFAULT_MAX_POLLING_DELAY, DEFAULT_POLLING_INTERVAL, VirtualFilterConfig,
};
pub use error::VirtualFilterError;
pub use ingest::{
    BlockData, BlockSummary, EpochData, LogIngestor, LogStore, ReceiptRecord, TxnRecord,
    short_hash_id,
};
pub use proxy::{ProxyStub, StubState};
pub use query::{LogQuery, QueryKind, QueryPlanner, filter_logs};
pub use registry::{FilterRecord, FilterRegistry};
pub use system::FilterSystem;
pub use types::{DelegateInfo, FilterChanges, FilterId, FilterKind, LogBatch};
pub use upstream::{ClientPool, FilterRpc, NodeClient, node_name};
