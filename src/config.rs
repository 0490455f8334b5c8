use std::{collections::HashMap, time::Duration};

/// Minimum interval between upstream polls per proxy stub.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(1);
/// Cap on the poll loop's exponential backoff.
pub const DEFAULT_MAX_POLLING_DELAY: Duration = Duration::from_secs(60);
/// Idle timeout for client filters.
pub const DEFAULT_FILTER_TTL: Duration = Duration::from_secs(5 * 60);
/// Maximum block span accepted for a single log query.
pub const DEFAULT_MAX_QUERY_SPAN: u64 = 10_000;
/// Maximum number of addresses accepted in a log query.
pub const DEFAULT_MAX_ADDRESSES: usize = 32;
/// Maximum number of values accepted per topic position.
pub const DEFAULT_MAX_TOPIC_SET_CARDINALITY: usize = 32;
/// Per-call timeout for upstream RPC operations.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Maximum retry attempts per upstream RPC call.
pub const DEFAULT_MAX_RETRIES: usize = 3;
/// Base delay between upstream call retries.
pub const DEFAULT_RETRY_MIN_DELAY: Duration = Duration::from_secs(1);

/// Tunables for the virtual filter layer.
///
/// Construct with [`VirtualFilterConfig::default`] and override individual
/// settings with the chained setters.
#[derive(Clone, Debug)]
pub struct VirtualFilterConfig {
    /// Minimum interval between upstream polls per proxy stub.
    pub polling_interval: Duration,
    /// Cap on the poll loop's exponential backoff.
    pub max_polling_delay: Duration,
    /// Idle timeout for client filters; the reaper runs at half this period.
    pub filter_ttl: Duration,
    /// Maximum block span accepted for a single log query.
    pub max_query_span: u64,
    /// Maximum number of addresses accepted in a log query.
    pub max_addresses: usize,
    /// Maximum number of values accepted per topic position.
    pub max_topic_set_cardinality: usize,
    /// Per-call timeout for upstream RPC operations.
    pub call_timeout: Duration,
    /// Maximum retry attempts per upstream RPC call.
    pub max_retries: usize,
    /// Base delay between upstream call retries.
    pub retry_min_delay: Duration,
    /// Minimum servable block per chain id (the hardfork floor). Chains not
    /// listed have no floor.
    pub hardfork_block_by_chain_id: HashMap<u64, u64>,
}

impl Default for VirtualFilterConfig {
    fn default() -> Self {
        Self {
            polling_interval: DEFAULT_POLLING_INTERVAL,
            max_polling_delay: DEFAULT_MAX_POLLING_DELAY,
            filter_ttl: DEFAULT_FILTER_TTL,
            max_query_span: DEFAULT_MAX_QUERY_SPAN,
            max_addresses: DEFAULT_MAX_ADDRESSES,
            max_topic_set_cardinality: DEFAULT_MAX_TOPIC_SET_CARDINALITY,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_min_delay: DEFAULT_RETRY_MIN_DELAY,
            hardfork_block_by_chain_id: HashMap::new(),
        }
    }
}

impl VirtualFilterConfig {
    /// Sets the minimum interval between upstream polls per proxy stub.
    #[must_use]
    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    /// Sets the cap on the poll loop's exponential backoff.
    #[must_use]
    pub fn max_polling_delay(mut self, delay: Duration) -> Self {
        self.max_polling_delay = delay;
        self
    }

    /// Sets the idle timeout for client filters.
    #[must_use]
    pub fn filter_ttl(mut self, ttl: Duration) -> Self {
        self.filter_ttl = ttl;
        self
    }

    /// Sets the maximum block span accepted for a single log query.
    #[must_use]
    pub fn max_query_span(mut self, span: u64) -> Self {
        self.max_query_span = span;
        self
    }

    /// Sets the maximum number of addresses accepted in a log query.
    #[must_use]
    pub fn max_addresses(mut self, max: usize) -> Self {
        self.max_addresses = max;
        self
    }

    /// Sets the maximum number of values accepted per topic position.
    #[must_use]
    pub fn max_topic_set_cardinality(mut self, max: usize) -> Self {
        self.max_topic_set_cardinality = max;
        self
    }

    /// Sets the per-call timeout for upstream RPC operations.
    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Sets the maximum retry attempts per upstream RPC call.
    #[must_use]
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base delay between upstream call retries.
    #[must_use]
    pub fn retry_min_delay(mut self, delay: Duration) -> Self {
        self.retry_min_delay = delay;
        self
    }

    /// Sets the minimum servable block for a chain id.
    #[must_use]
    pub fn hardfork_block(mut self, chain_id: u64, block: u64) -> Self {
        self.hardfork_block_by_chain_id.insert(chain_id, block);
        self
    }

    /// The hardfork floor for `chain_id`; zero when none is configured.
    #[must_use]
    pub fn hardfork_floor(&self, chain_id: u64) -> u64 {
        self.hardfork_block_by_chain_id.get(&chain_id).copied().unwrap_or(0)
    }
}
