//! Shared harness: a facade wired to scriptable mock nodes and the
//! in-memory store.

// Each test binary uses a different slice of the harness.
#![allow(dead_code)]

use std::{collections::HashMap, sync::Arc, time::Duration};

use virtual_filter::{
    ClientPool, FilterApi, FilterSystem, VirtualFilterConfig, VirtualFilterError,
    node_name,
    test_utils::{MemoryStore, MockFilterClient},
};

pub const NODE1: &str = "http://node1:8545";
pub const NODE2: &str = "http://node2:8545";
pub const CHAIN_ID: u64 = 1030;

pub struct Harness {
    pub api: Arc<FilterApi<MockFilterClient, MemoryStore>>,
    pub system: Arc<FilterSystem<MockFilterClient, MemoryStore>>,
    pub store: Arc<MemoryStore>,
    nodes: HashMap<String, Arc<MockFilterClient>>,
}

impl Harness {
    pub fn node(&self, url: &str) -> &Arc<MockFilterClient> {
        &self.nodes[&node_name(url)]
    }
}

/// Builds a facade backed by mock nodes at [`NODE1`] and [`NODE2`].
pub fn harness(config: VirtualFilterConfig) -> Harness {
    let nodes: HashMap<String, Arc<MockFilterClient>> = [NODE1, NODE2]
        .into_iter()
        .map(|url| (node_name(url), Arc::new(MockFilterClient::new(url, CHAIN_ID))))
        .collect();

    let store = Arc::new(MemoryStore::new());
    let system = FilterSystem::new(config, store.clone());

    let connectable = nodes.clone();
    let clients: ClientPool<MockFilterClient> = ClientPool::new(Box::new(move |url: &str| {
        let client = connectable.get(&node_name(url)).cloned();
        Box::pin(async move {
            client.ok_or_else(|| VirtualFilterError::Internal("unknown test node".to_string()))
        })
    }));

    let api = FilterApi::new(system.clone(), clients);

    Harness { api, system, store, nodes }
}

/// Config with short timings suitable for the paused test clock.
pub fn fast_config() -> VirtualFilterConfig {
    VirtualFilterConfig::default()
        .polling_interval(Duration::from_millis(20))
        .max_polling_delay(Duration::from_millis(200))
        .filter_ttl(Duration::from_millis(500))
}

/// Lets background tasks (poll loops, the reaper, ingest writes) run for
/// `millis` of simulated time.
pub async fn run_for(millis: u64) {
    tokio::time::sleep(Duration::from_millis(millis)).await;
}
