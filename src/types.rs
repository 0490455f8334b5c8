use std::fmt;

use alloy::{
    primitives::{B256, U256},
    rpc::types::Log,
};
use serde::{Deserialize, Serialize};

/// Opaque filter identifier.
///
/// Ids issued to clients carry 128 bits of entropy so they are unguessable
/// process-wide. The same type carries upstream filter ids, which are opaque
/// hex quantities of whatever width the node chose. The reserved value
/// [`FilterId::NIL`] (`0x0`) is never issued and denotes "no filter".
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterId(U256);

impl FilterId {
    /// The reserved "no filter" id.
    pub const NIL: Self = Self(U256::ZERO);

    /// Generates a fresh unguessable id.
    #[must_use]
    pub fn random() -> Self {
        loop {
            let id = Self(U256::from(rand::random::<u128>()));
            if !id.is_nil() {
                return id;
            }
        }
    }

    /// True if this is the reserved nil id.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<U256> for FilterId {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl From<u64> for FilterId {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The kind of a client-visible filter.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FilterKind {
    /// Streams hashes of newly confirmed blocks.
    Block,
    /// Streams hashes of pending transactions.
    PendingTxn,
    /// Streams logs matching a [`LogQuery`](crate::LogQuery).
    Log,
}

impl FilterKind {
    /// True if this is a log filter.
    #[must_use]
    pub fn is_log(&self) -> bool {
        matches!(self, Self::Log)
    }
}

/// Binding of a client filter to its originating upstream filter and node.
///
/// Immutable for the life of the filter record: even when the frontend
/// router later selects a different node for the same client, operations on
/// the filter keep using `node_url`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DelegateInfo {
    /// The filter id issued by the upstream node.
    pub fid: FilterId,
    /// URL of the node that owns the upstream filter.
    pub node_url: String,
}

impl DelegateInfo {
    /// Creates a new delegate binding.
    #[must_use]
    pub fn new(fid: FilterId, node_url: impl Into<String>) -> Self {
        Self { fid, node_url: node_url.into() }
    }
}

/// Output of polling a filter: log entries or hashes, depending on the
/// filter kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterChanges {
    /// Log entries, for log filters.
    Logs(Vec<Log>),
    /// Block or transaction hashes, for block and pending-txn filters.
    Hashes(Vec<B256>),
}

impl FilterChanges {
    /// An empty log-shaped change set.
    #[must_use]
    pub fn empty_logs() -> Self {
        Self::Logs(Vec::new())
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Logs(logs) => logs.len(),
            Self::Hashes(hashes) => hashes.len(),
        }
    }

    /// True if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumes the changes, returning the log entries. Hash-shaped changes
    /// yield an empty list.
    #[must_use]
    pub fn into_logs(self) -> Vec<Log> {
        match self {
            Self::Logs(logs) => logs,
            Self::Hashes(_) => Vec::new(),
        }
    }
}

impl From<Vec<Log>> for FilterChanges {
    fn from(logs: Vec<Log>) -> Self {
        Self::Logs(logs)
    }
}

impl From<Vec<B256>> for FilterChanges {
    fn from(hashes: Vec<B256>) -> Self {
        Self::Hashes(hashes)
    }
}

/// An ordered log append produced by one upstream poll.
///
/// Monotonic in `from_block` under non-reorg conditions. `reorged_from` is
/// the lowest block number among `removed: true` logs in the batch, set when
/// the upstream retracted previously delivered logs.
#[derive(Clone, Debug, Default)]
pub struct LogBatch {
    /// Lowest block number covered by the batch.
    pub from_block: u64,
    /// Highest block number covered by the batch.
    pub to_block: u64,
    /// Logs in upstream delivery order.
    pub logs: Vec<Log>,
    /// First reverted block, when the batch carries retractions.
    pub reorged_from: Option<u64>,
}

impl LogBatch {
    /// Builds a batch from logs in upstream delivery order.
    ///
    /// Logs without a block number (pending logs) do not contribute to the
    /// range bounds or the reorg marker.
    #[must_use]
    pub fn from_logs(logs: Vec<Log>) -> Self {
        let mut batch = Self { from_block: u64::MAX, ..Self::default() };

        for log in &logs {
            let Some(number) = log.block_number else { continue };
            batch.from_block = batch.from_block.min(number);
            batch.to_block = batch.to_block.max(number);
            if log.removed {
                batch.reorged_from =
                    Some(batch.reorged_from.map_or(number, |first| first.min(number)));
            }
        }

        if batch.from_block == u64::MAX {
            batch.from_block = 0;
        }

        batch.logs = logs;
        batch
    }

    /// True if the batch carries no logs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_filter_ids_are_never_nil() {
        for _ in 0..64 {
            assert!(!FilterId::random().is_nil());
        }
    }

    #[test]
    fn filter_id_displays_as_hex_quantity() {
        assert_eq!(FilterId::from(0x1au64).to_string(), "0x1a");
        assert_eq!(FilterId::NIL.to_string(), "0x0");
    }

    #[test]
    fn filter_id_serializes_as_hex_quantity() {
        let json = serde_json::to_string(&FilterId::from(0x2au64)).unwrap();
        assert_eq!(json, "\"0x2a\"");

        let back: FilterId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, FilterId::from(0x2au64));
    }

    #[test]
    fn changes_deserialize_untagged() {
        let hashes: FilterChanges = serde_json::from_str(
            "[\"0x00000000000000000000000000000000000000000000000000000000000000aa\"]",
        )
        .unwrap();
        assert!(matches!(hashes, FilterChanges::Hashes(ref h) if h.len() == 1));
    }

    #[test]
    fn batch_bounds_and_reorg_marker_track_log_blocks() {
        let mut low = Log::default();
        low.block_number = Some(5);
        let mut high = Log::default();
        high.block_number = Some(9);
        high.removed = true;

        let batch = LogBatch::from_logs(vec![low, high]);

        assert_eq!(batch.from_block, 5);
        assert_eq!(batch.to_block, 9);
        assert_eq!(batch.reorged_from, Some(9));
    }
}
