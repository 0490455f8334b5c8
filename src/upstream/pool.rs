//! Shared upstream clients, keyed by node name.

use std::{collections::HashMap, sync::Arc};

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{VirtualFilterError, config::VirtualFilterConfig, upstream::NodeClient};

type Connector<C> =
    Box<dyn Fn(&str) -> BoxFuture<'static, Result<Arc<C>, VirtualFilterError>> + Send + Sync>;

/// Normalizes a node URL to the name the pool keys on: scheme and trailing
/// slashes stripped, host folded to lowercase.
#[must_use]
pub fn node_name(node_url: &str) -> String {
    let trimmed = node_url
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("wss://")
        .trim_start_matches("ws://")
        .trim_end_matches('/');
    trimmed.to_lowercase()
}

/// Pool of upstream clients, one per node.
///
/// Lookup-or-construct is atomic: the connector runs under the pool lock, so
/// two concurrent calls for the same node never establish two clients.
pub struct ClientPool<C> {
    connector: Connector<C>,
    clients: Mutex<HashMap<String, Arc<C>>>,
}

impl<C> ClientPool<C> {
    /// Creates a pool that constructs missing clients with `connector`.
    #[must_use]
    pub fn new(connector: Connector<C>) -> Self {
        Self { connector, clients: Mutex::new(HashMap::new()) }
    }

    /// Returns the client for `node_url`, constructing it if absent.
    ///
    /// # Errors
    ///
    /// Propagates the connector's error; nothing is inserted on failure.
    pub async fn load_or_connect(&self, node_url: &str) -> Result<Arc<C>, VirtualFilterError> {
        let name = node_name(node_url);

        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&name) {
            return Ok(client.clone());
        }

        debug!(node = %name, "Connecting upstream client");
        let client = (self.connector)(node_url).await?;
        clients.insert(name, client.clone());
        Ok(client)
    }

    /// Number of established clients.
    #[must_use]
    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// True if no clients have been established.
    #[must_use]
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl ClientPool<NodeClient> {
    /// Pool of HTTP [`NodeClient`]s using the config's timeout and retry
    /// settings.
    #[must_use]
    pub fn http(config: &VirtualFilterConfig) -> Self {
        let config = config.clone();
        Self::new(Box::new(move |url: &str| {
            let url = url.to_string();
            let config = config.clone();
            Box::pin(async move { NodeClient::new(&url, &config).map(Arc::new) })
        }))
    }
}

impl<C> std::fmt::Debug for ClientPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPool").finish_non_exhaustive()
    }
}
