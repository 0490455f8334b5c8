//! The transactional read-through store contract and its record types.

use std::collections::HashMap;

use alloy::{primitives::B256, rpc::types::Log};

use crate::{VirtualFilterError, query::LogQuery};

/// Short identifier derived from a hash: its first eight bytes. Hash lookups
/// index on this prefix to bound index size; the full hash disambiguates.
#[must_use]
pub fn short_hash_id(hash: &B256) -> u64 {
    u64::from_be_bytes(hash.0[..8].try_into().expect("hash is 32 bytes"))
}

/// Persisted block metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockSummary {
    /// Block hash.
    pub hash: B256,
    /// Block number.
    pub number: u64,
    /// The epoch this block belongs to.
    pub epoch: u64,
    /// True for the last block of its epoch.
    pub pivot: bool,
}

/// A block and its transaction hashes within an epoch write.
#[derive(Clone, Debug)]
pub struct BlockData {
    /// The block's metadata.
    pub summary: BlockSummary,
    /// Transaction hashes in block order.
    pub txns: Vec<B256>,
}

/// Persisted transaction record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxnRecord {
    /// Transaction hash.
    pub hash: B256,
    /// Epoch of the containing block.
    pub epoch: u64,
    /// Hash of the containing block.
    pub block_hash: B256,
}

/// Execution receipt: the logs a transaction emitted.
#[derive(Clone, Debug, PartialEq)]
pub struct ReceiptRecord {
    /// Transaction hash.
    pub tx_hash: B256,
    /// Logs emitted by the transaction, in log-index order.
    pub logs: Vec<Log>,
}

/// One epoch's worth of data to persist in a single transaction.
///
/// Transactions without an entry in `receipts` were not executed in the
/// epoch and are skipped by the store.
#[derive(Clone, Debug, Default)]
pub struct EpochData {
    /// The epoch number.
    pub epoch: u64,
    /// Blocks in the epoch, in order; the last one is the pivot.
    pub blocks: Vec<BlockData>,
    /// Receipts keyed by transaction hash.
    pub receipts: HashMap<B256, ReceiptRecord>,
}

/// Transactional store for confirmed blocks, transactions, and logs.
///
/// Writes are all-or-nothing. Reads serve the facade's log paths; a store
/// failure there is logged and falls through to the upstream node, never to
/// the client.
pub trait LogStore: Send + Sync + 'static {
    /// Persists one epoch atomically.
    fn put_epoch_data(
        &self,
        data: EpochData,
    ) -> impl Future<Output = Result<(), VirtualFilterError>> + Send;

    /// Persists a slice of epochs in one transaction.
    fn put_epoch_data_slice(
        &self,
        slice: Vec<EpochData>,
    ) -> impl Future<Output = Result<(), VirtualFilterError>> + Send;

    /// Deletes blocks, transactions, and logs for `from_epoch..=to_epoch`
    /// in one transaction.
    fn remove(
        &self,
        from_epoch: u64,
        to_epoch: u64,
    ) -> impl Future<Output = Result<(), VirtualFilterError>> + Send;

    /// Logs matching `query`, ordered by block number then log index.
    fn get_logs(
        &self,
        query: &LogQuery,
    ) -> impl Future<Output = Result<Vec<Log>, VirtualFilterError>> + Send;

    /// The pivot block summary for an epoch.
    fn get_block_summary_by_epoch(
        &self,
        epoch: u64,
    ) -> impl Future<Output = Result<Option<BlockSummary>, VirtualFilterError>> + Send;

    /// A block summary looked up by hash (via the short-id index).
    fn get_block_summary_by_hash(
        &self,
        hash: B256,
    ) -> impl Future<Output = Result<Option<BlockSummary>, VirtualFilterError>> + Send;

    /// The `(min, max)` epoch currently held, or `None` when empty.
    fn get_block_epoch_range(
        &self,
    ) -> impl Future<Output = Result<Option<(u64, u64)>, VirtualFilterError>> + Send;

    /// A transaction record by hash.
    fn get_transaction(
        &self,
        hash: B256,
    ) -> impl Future<Output = Result<Option<TxnRecord>, VirtualFilterError>> + Send;

    /// A receipt by transaction hash.
    fn get_receipt(
        &self,
        hash: B256,
    ) -> impl Future<Output = Result<Option<ReceiptRecord>, VirtualFilterError>> + Send;

    /// Hashes of the blocks in an epoch, pivot last.
    fn get_blocks_by_epoch(
        &self,
        epoch: u64,
    ) -> impl Future<Output = Result<Vec<B256>, VirtualFilterError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_hash_id_takes_the_leading_bytes() {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&[0, 0, 0, 0, 0, 0, 0x12, 0x34]);
        assert_eq!(short_hash_id(&B256::from(bytes)), 0x1234);
    }
}
