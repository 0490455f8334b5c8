//! Log filter query in `eth_getLogs` wire shape, plus log matching.

use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, B256},
    rpc::types::Log,
};
use serde::{Deserialize, Serialize};

/// Number of topic positions in a log.
pub const TOPIC_POSITIONS: usize = 4;

/// Address/topic/block-range predicate for log filters.
///
/// Follows `eth_getLogs` semantics:
/// - `address` is an OR-set; empty matches any address.
/// - Each topic position is independently filtered: `None` matches any value,
///   `Some(set)` matches if the log's topic at that position is in the set.
///   Positions combine with AND.
/// - `block_hash` is mutually exclusive with the block range (enforced by the
///   query planner, not by this type).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogQuery {
    /// Start of the block range (inclusive).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_block: Option<BlockNumberOrTag>,
    /// End of the block range (inclusive).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_block: Option<BlockNumberOrTag>,
    /// Restricts the query to a single block by hash.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<B256>,
    /// Emitting contract addresses; empty matches any address.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub address: Vec<Address>,
    /// Topic filters for positions 0..4.
    #[serde(with = "topics_serde", skip_serializing_if = "topics_are_empty")]
    pub topics: [Option<Vec<B256>>; TOPIC_POSITIONS],
}

fn topics_are_empty(topics: &[Option<Vec<B256>>; TOPIC_POSITIONS]) -> bool {
    topics.iter().all(Option::is_none)
}

impl LogQuery {
    /// Creates an empty query matching every log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the start of the block range.
    #[must_use]
    pub fn from_block(mut self, block: impl Into<BlockNumberOrTag>) -> Self {
        self.from_block = Some(block.into());
        self
    }

    /// Sets the end of the block range.
    #[must_use]
    pub fn to_block(mut self, block: impl Into<BlockNumberOrTag>) -> Self {
        self.to_block = Some(block.into());
        self
    }

    /// Restricts the query to the block with the given hash.
    #[must_use]
    pub fn at_block_hash(mut self, hash: B256) -> Self {
        self.block_hash = Some(hash);
        self
    }

    /// Adds an emitting contract address.
    #[must_use]
    pub fn address(mut self, address: Address) -> Self {
        self.address.push(address);
        self
    }

    /// Sets the accepted values for a topic position.
    ///
    /// # Panics
    ///
    /// Panics if `position >= 4`.
    #[must_use]
    pub fn topic(mut self, position: usize, values: Vec<B256>) -> Self {
        self.topics[position] = Some(values);
        self
    }

    /// The concrete start block, when one is set.
    #[must_use]
    pub fn from_number(&self) -> Option<u64> {
        self.from_block.and_then(|tag| tag.as_number())
    }

    /// The concrete end block, when one is set.
    #[must_use]
    pub fn to_number(&self) -> Option<u64> {
        self.to_block.and_then(|tag| tag.as_number())
    }

    /// True if either range bound is a symbolic tag that needs the chain head
    /// to resolve.
    #[must_use]
    pub fn needs_head_resolution(&self) -> bool {
        let symbolic = |tag: &Option<BlockNumberOrTag>| {
            tag.is_none_or(|t| !matches!(t, BlockNumberOrTag::Number(_) | BlockNumberOrTag::Earliest))
        };
        self.block_hash.is_none() && (symbolic(&self.from_block) || symbolic(&self.to_block))
    }

    /// True if the given log matches this query's block range, address set,
    /// and topic filters.
    #[must_use]
    pub fn matches(&self, log: &Log) -> bool {
        if let (Some(from), Some(number)) = (self.from_number(), log.block_number)
            && number < from
        {
            return false;
        }
        if let (Some(to), Some(number)) = (self.to_number(), log.block_number)
            && number > to
        {
            return false;
        }

        if let (Some(hash), Some(block_hash)) = (self.block_hash, log.block_hash)
            && hash != block_hash
        {
            return false;
        }

        if !self.address.is_empty() && !self.address.contains(&log.inner.address) {
            return false;
        }

        let topics = log.inner.topics();
        self.topics.iter().enumerate().all(|(position, wanted)| {
            let Some(wanted) = wanted else { return true };
            topics.get(position).is_some_and(|actual| wanted.contains(actual))
        })
    }
}

/// Keeps only the logs matching `query`, preserving order.
#[must_use]
pub fn filter_logs(logs: Vec<Log>, query: &LogQuery) -> Vec<Log> {
    logs.into_iter().filter(|log| query.matches(log)).collect()
}

/// Wire encoding for the topics array: positions serialize as
/// `null | [hash, ...]`, trailing empty positions are trimmed, and a bare
/// hash deserializes as a single-element set.
mod topics_serde {
    use super::{B256, TOPIC_POSITIONS};
    use serde::{
        Deserialize, Deserializer, Serializer,
        de::Error as DeError,
        ser::SerializeSeq,
    };

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TopicEntry {
        Single(B256),
        Many(Vec<B256>),
        Empty(Option<()>),
    }

    pub(super) fn serialize<S: Serializer>(
        topics: &[Option<Vec<B256>>; TOPIC_POSITIONS],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let used = topics.iter().rposition(Option::is_some).map_or(0, |last| last + 1);
        let mut seq = serializer.serialize_seq(Some(used))?;
        for entry in &topics[..used] {
            seq.serialize_element(entry)?;
        }
        seq.end()
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[Option<Vec<B256>>; TOPIC_POSITIONS], D::Error> {
        let entries = Vec::<TopicEntry>::deserialize(deserializer)?;
        if entries.len() > TOPIC_POSITIONS {
            return Err(D::Error::custom("too many topic positions"));
        }

        let mut topics: [Option<Vec<B256>>; TOPIC_POSITIONS] = Default::default();
        for (position, entry) in entries.into_iter().enumerate() {
            topics[position] = match entry {
                TopicEntry::Single(hash) => Some(vec![hash]),
                TopicEntry::Many(set) => Some(set),
                TopicEntry::Empty(_) => None,
            };
        }
        Ok(topics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Bytes, LogData};

    fn log_at(block: u64, address: Address, topics: Vec<B256>) -> Log {
        let mut log = Log::default();
        log.inner = alloy::primitives::Log {
            address,
            data: LogData::new_unchecked(topics, Bytes::new()),
        };
        log.block_number = Some(block);
        log
    }

    #[test]
    fn empty_query_matches_everything() {
        let log = log_at(7, Address::repeat_byte(0x11), vec![B256::repeat_byte(0xaa)]);
        assert!(LogQuery::new().matches(&log));
    }

    #[test]
    fn address_set_is_an_or_filter() {
        let wanted = Address::repeat_byte(0xaa);
        let other = Address::repeat_byte(0xbb);
        let query = LogQuery::new().address(wanted).address(other);

        assert!(query.matches(&log_at(1, wanted, vec![])));
        assert!(query.matches(&log_at(1, other, vec![])));
        assert!(!query.matches(&log_at(1, Address::repeat_byte(0xcc), vec![])));
    }

    #[test]
    fn topic_positions_combine_with_and() {
        let t0 = B256::repeat_byte(0x01);
        let t1 = B256::repeat_byte(0x02);
        let query = LogQuery::new().topic(0, vec![t0]).topic(1, vec![t1]);

        let address = Address::repeat_byte(0x11);
        assert!(query.matches(&log_at(1, address, vec![t0, t1])));
        assert!(!query.matches(&log_at(1, address, vec![t0])));
        assert!(!query.matches(&log_at(1, address, vec![t1, t0])));
    }

    #[test]
    fn block_range_bounds_are_inclusive() {
        let query = LogQuery::new().from_block(100u64).to_block(200u64);
        let address = Address::repeat_byte(0x11);

        assert!(query.matches(&log_at(100, address, vec![])));
        assert!(query.matches(&log_at(200, address, vec![])));
        assert!(!query.matches(&log_at(99, address, vec![])));
        assert!(!query.matches(&log_at(201, address, vec![])));
    }

    #[test]
    fn filter_logs_preserves_order() {
        let address = Address::repeat_byte(0x11);
        let logs = vec![
            log_at(150, address, vec![]),
            log_at(151, Address::repeat_byte(0x22), vec![]),
            log_at(152, address, vec![]),
        ];

        let kept = filter_logs(logs, &LogQuery::new().address(address));

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].block_number, Some(150));
        assert_eq!(kept[1].block_number, Some(152));
    }

    #[test]
    fn wire_shape_trims_trailing_topic_nulls() {
        let query = LogQuery::new()
            .from_block(100u64)
            .to_block(BlockNumberOrTag::Latest)
            .topic(1, vec![B256::repeat_byte(0x02)]);

        let json = serde_json::to_value(&query).unwrap();

        assert_eq!(json["fromBlock"], "0x64");
        assert_eq!(json["toBlock"], "latest");
        let topics = json["topics"].as_array().unwrap();
        assert_eq!(topics.len(), 2);
        assert!(topics[0].is_null());
        assert!(topics[1].is_array());

        let back: LogQuery = serde_json::from_value(json).unwrap();
        assert_eq!(back, query);
    }

    #[test]
    fn bare_topic_hash_deserializes_as_singleton_set() {
        let t0 = B256::repeat_byte(0x03);
        let json = serde_json::json!({ "topics": [t0] });

        let query: LogQuery = serde_json::from_value(json).unwrap();

        assert_eq!(query.topics[0], Some(vec![t0]));
    }
}
