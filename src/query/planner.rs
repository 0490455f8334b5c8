//! Query classification, normalization, and validation.

use alloy::eips::BlockNumberOrTag;

use crate::{VirtualFilterError, query::LogQuery};

/// How a log query selects blocks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum QueryKind {
    /// Selects one block by hash.
    ByBlockHash,
    /// Selects an inclusive block-number range.
    ByBlockRange,
    /// Selects a single block by number (including the implicit
    /// latest-only query).
    SingleBlock,
    /// Ambiguous or malformed selection.
    Invalid,
}

/// Classifies, normalizes, and validates log queries against configured
/// limits and the chain's hardfork floor.
#[derive(Copy, Clone, Debug)]
pub struct QueryPlanner {
    max_query_span: u64,
    max_addresses: usize,
    max_topic_set_cardinality: usize,
}

impl QueryPlanner {
    /// Creates a planner with the given validation limits.
    #[must_use]
    pub fn new(max_query_span: u64, max_addresses: usize, max_topic_set_cardinality: usize) -> Self {
        Self { max_query_span, max_addresses, max_topic_set_cardinality }
    }

    /// Determines how the query selects blocks.
    ///
    /// Setting both `block_hash` and a range bound is ambiguous and yields
    /// [`QueryKind::Invalid`].
    #[must_use]
    pub fn classify(&self, query: &LogQuery) -> QueryKind {
        let has_range = query.from_block.is_some() || query.to_block.is_some();

        if query.block_hash.is_some() {
            if has_range {
                return QueryKind::Invalid;
            }
            return QueryKind::ByBlockHash;
        }

        if !has_range {
            // Neither hash nor range: the latest block only.
            return QueryKind::SingleBlock;
        }

        match (query.from_number(), query.to_number()) {
            (Some(from), Some(to)) if from == to => QueryKind::SingleBlock,
            _ => QueryKind::ByBlockRange,
        }
    }

    /// Resolves symbolic block tags against the chain head and clamps the
    /// range start to the hardfork floor.
    ///
    /// `head` is the upstream's current head block, fetched lazily by the
    /// caller only when [`LogQuery::needs_head_resolution`] says so. Hash
    /// queries pass through untouched.
    #[must_use]
    pub fn normalize(&self, query: &LogQuery, head: u64, hardfork_floor: u64) -> LogQuery {
        if query.block_hash.is_some() {
            return query.clone();
        }

        let resolve = |tag: Option<BlockNumberOrTag>| match tag {
            Some(BlockNumberOrTag::Number(number)) => number,
            Some(BlockNumberOrTag::Earliest) => 0,
            // Latest, finalized, safe, pending and an absent bound all
            // resolve to the head for filter purposes.
            _ => head,
        };

        let from = resolve(query.from_block).max(hardfork_floor);
        let to = resolve(query.to_block);

        let mut normalized = query.clone();
        normalized.from_block = Some(BlockNumberOrTag::Number(from));
        normalized.to_block = Some(BlockNumberOrTag::Number(to));
        normalized
    }

    /// Enforces range ordering, the span limit, and address/topic
    /// cardinality caps on a normalized query.
    ///
    /// # Errors
    ///
    /// Returns [`VirtualFilterError::InvalidFilter`] describing the first
    /// violated limit.
    pub fn validate(&self, query: &LogQuery) -> Result<(), VirtualFilterError> {
        if let (Some(from), Some(to)) = (query.from_number(), query.to_number()) {
            if from > to {
                return Err(VirtualFilterError::invalid(format!(
                    "invalid block range: from {from} is after to {to}"
                )));
            }

            let span = to - from + 1;
            if span > self.max_query_span {
                return Err(VirtualFilterError::invalid(format!(
                    "block range too wide: {span} blocks exceeds the {} block limit",
                    self.max_query_span
                )));
            }
        }

        if query.address.len() > self.max_addresses {
            return Err(VirtualFilterError::invalid(format!(
                "too many addresses: {} exceeds the limit of {}",
                query.address.len(),
                self.max_addresses
            )));
        }

        for (position, wanted) in query.topics.iter().enumerate() {
            if let Some(wanted) = wanted
                && wanted.len() > self.max_topic_set_cardinality
            {
                return Err(VirtualFilterError::invalid(format!(
                    "too many topics at position {position}: {} exceeds the limit of {}",
                    wanted.len(),
                    self.max_topic_set_cardinality
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::B256;

    fn planner() -> QueryPlanner {
        QueryPlanner::new(1000, 2, 2)
    }

    #[test]
    fn hash_and_range_together_are_invalid() {
        let query = LogQuery::new().at_block_hash(B256::repeat_byte(0x01)).from_block(5u64);
        assert_eq!(planner().classify(&query), QueryKind::Invalid);
    }

    #[test]
    fn classification_covers_the_three_selection_shapes() {
        let planner = planner();

        let by_hash = LogQuery::new().at_block_hash(B256::repeat_byte(0x01));
        assert_eq!(planner.classify(&by_hash), QueryKind::ByBlockHash);

        let by_range = LogQuery::new().from_block(1u64).to_block(9u64);
        assert_eq!(planner.classify(&by_range), QueryKind::ByBlockRange);

        let single = LogQuery::new().from_block(5u64).to_block(5u64);
        assert_eq!(planner.classify(&single), QueryKind::SingleBlock);

        assert_eq!(planner.classify(&LogQuery::new()), QueryKind::SingleBlock);
    }

    #[test]
    fn normalize_resolves_tags_and_clamps_to_the_floor() {
        let query = LogQuery::new()
            .from_block(BlockNumberOrTag::Earliest)
            .to_block(BlockNumberOrTag::Latest);

        let normalized = planner().normalize(&query, 500, 100);

        assert_eq!(normalized.from_number(), Some(100));
        assert_eq!(normalized.to_number(), Some(500));
    }

    #[test]
    fn normalize_keeps_concrete_bounds_above_the_floor() {
        let query = LogQuery::new().from_block(250u64).to_block(300u64);

        let normalized = planner().normalize(&query, 500, 100);

        assert_eq!(normalized.from_number(), Some(250));
        assert_eq!(normalized.to_number(), Some(300));
    }

    #[test]
    fn validate_rejects_inverted_ranges() {
        let query = LogQuery::new().from_block(10u64).to_block(5u64);
        assert!(matches!(
            planner().validate(&query),
            Err(VirtualFilterError::InvalidFilter(_))
        ));
    }

    #[test]
    fn validate_rejects_oversized_spans() {
        let query = LogQuery::new().from_block(0u64).to_block(1000u64);
        assert!(planner().validate(&query).is_err());

        let query = LogQuery::new().from_block(1u64).to_block(1000u64);
        assert!(planner().validate(&query).is_ok());
    }

    #[test]
    fn validate_caps_address_and_topic_cardinality() {
        let planner = planner();

        let mut query = LogQuery::new();
        for byte in 0..3u8 {
            query = query.address(alloy::primitives::Address::repeat_byte(byte));
        }
        assert!(planner.validate(&query).is_err());

        let query = LogQuery::new().topic(
            0,
            vec![B256::repeat_byte(1), B256::repeat_byte(2), B256::repeat_byte(3)],
        );
        assert!(planner.validate(&query).is_err());
    }
}
