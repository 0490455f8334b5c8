//! Transactional in-memory reference implementation of [`LogStore`].

use std::collections::{BTreeMap, HashMap};

use alloy::{primitives::B256, rpc::types::Log};
use parking_lot::Mutex;

use crate::{
    VirtualFilterError,
    ingest::{BlockSummary, EpochData, LogStore, ReceiptRecord, TxnRecord, short_hash_id},
    query::LogQuery,
};

#[derive(Clone, Debug, Default)]
struct Tables {
    /// Epoch -> blocks, pivot last.
    blocks: BTreeMap<u64, Vec<BlockSummary>>,
    /// Short hash id -> summaries sharing that prefix.
    block_index: HashMap<u64, Vec<BlockSummary>>,
    txns: HashMap<B256, TxnRecord>,
    receipts: HashMap<B256, ReceiptRecord>,
    /// Sorted by (block number, log index).
    logs: Vec<Log>,
}

/// In-memory [`LogStore`] with all-or-nothing writes.
///
/// Each write mutates a staged copy of the tables and swaps it in on
/// success, so a failed write leaves nothing behind. Failure injection
/// hooks let tests exercise the fall-through-to-upstream paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_writes: Mutex<bool>,
    fail_reads: Mutex<bool>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent writes fail with a store error.
    pub fn fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }

    /// Makes subsequent reads fail with a store error.
    pub fn fail_reads(&self, fail: bool) {
        *self.fail_reads.lock() = fail;
    }

    /// Number of epochs currently held.
    #[must_use]
    pub fn epoch_count(&self) -> usize {
        self.tables.lock().blocks.len()
    }

    /// Number of logs currently held.
    #[must_use]
    pub fn log_count(&self) -> usize {
        self.tables.lock().logs.len()
    }

    fn write_guard(&self) -> Result<(), VirtualFilterError> {
        if *self.fail_writes.lock() {
            return Err(VirtualFilterError::Store("write rejected".to_string()));
        }
        Ok(())
    }

    fn read_guard(&self) -> Result<(), VirtualFilterError> {
        if *self.fail_reads.lock() {
            return Err(VirtualFilterError::Store("read rejected".to_string()));
        }
        Ok(())
    }

    fn apply_epoch(tables: &mut Tables, data: EpochData) {
        for block in data.blocks {
            let summary = block.summary.clone();
            tables
                .block_index
                .entry(short_hash_id(&summary.hash))
                .or_default()
                .push(summary.clone());
            tables.blocks.entry(data.epoch).or_default().push(summary);

            for tx_hash in block.txns {
                // Only executed transactions carry a receipt; skip the rest.
                let Some(receipt) = data.receipts.get(&tx_hash) else {
                    continue;
                };
                tables.txns.insert(
                    tx_hash,
                    TxnRecord {
                        hash: tx_hash,
                        epoch: data.epoch,
                        block_hash: block.summary.hash,
                    },
                );
                tables.receipts.insert(tx_hash, receipt.clone());
                tables.logs.extend(receipt.logs.iter().cloned());
            }
        }

        tables.logs.sort_by_key(|log| (log.block_number, log.log_index));
    }
}

impl LogStore for MemoryStore {
    async fn put_epoch_data(&self, data: EpochData) -> Result<(), VirtualFilterError> {
        self.put_epoch_data_slice(vec![data]).await
    }

    async fn put_epoch_data_slice(&self, slice: Vec<EpochData>) -> Result<(), VirtualFilterError> {
        self.write_guard()?;
        let mut tables = self.tables.lock();
        let mut staged = tables.clone();
        for data in slice {
            Self::apply_epoch(&mut staged, data);
        }
        *tables = staged;
        Ok(())
    }

    async fn remove(&self, from_epoch: u64, to_epoch: u64) -> Result<(), VirtualFilterError> {
        self.write_guard()?;
        let mut tables = self.tables.lock();
        let mut staged = tables.clone();

        for epoch in from_epoch..=to_epoch {
            for summary in staged.blocks.remove(&epoch).unwrap_or_default() {
                if let Some(entries) = staged.block_index.get_mut(&short_hash_id(&summary.hash)) {
                    entries.retain(|entry| entry.hash != summary.hash);
                }
            }
        }
        staged.txns.retain(|_, txn| txn.epoch < from_epoch || txn.epoch > to_epoch);
        let Tables { txns, receipts, logs, .. } = &mut staged;
        receipts.retain(|hash, _| txns.contains_key(hash));
        logs.retain(|log| {
            log.block_number
                .is_none_or(|number| number < from_epoch || number > to_epoch)
        });

        *tables = staged;
        Ok(())
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>, VirtualFilterError> {
        self.read_guard()?;
        let tables = self.tables.lock();
        Ok(tables.logs.iter().filter(|log| query.matches(log)).cloned().collect())
    }

    async fn get_block_summary_by_epoch(
        &self,
        epoch: u64,
    ) -> Result<Option<BlockSummary>, VirtualFilterError> {
        self.read_guard()?;
        let tables = self.tables.lock();
        Ok(tables
            .blocks
            .get(&epoch)
            .and_then(|blocks| blocks.iter().find(|block| block.pivot).cloned()))
    }

    async fn get_block_summary_by_hash(
        &self,
        hash: B256,
    ) -> Result<Option<BlockSummary>, VirtualFilterError> {
        self.read_guard()?;
        let tables = self.tables.lock();
        Ok(tables
            .block_index
            .get(&short_hash_id(&hash))
            .and_then(|entries| entries.iter().find(|entry| entry.hash == hash).cloned()))
    }

    async fn get_block_epoch_range(&self) -> Result<Option<(u64, u64)>, VirtualFilterError> {
        self.read_guard()?;
        let tables = self.tables.lock();
        let min = tables.blocks.keys().next().copied();
        let max = tables.blocks.keys().next_back().copied();
        Ok(min.zip(max))
    }

    async fn get_transaction(&self, hash: B256) -> Result<Option<TxnRecord>, VirtualFilterError> {
        self.read_guard()?;
        Ok(self.tables.lock().txns.get(&hash).cloned())
    }

    async fn get_receipt(&self, hash: B256) -> Result<Option<ReceiptRecord>, VirtualFilterError> {
        self.read_guard()?;
        Ok(self.tables.lock().receipts.get(&hash).cloned())
    }

    async fn get_blocks_by_epoch(&self, epoch: u64) -> Result<Vec<B256>, VirtualFilterError> {
        self.read_guard()?;
        let tables = self.tables.lock();
        Ok(tables
            .blocks
            .get(&epoch)
            .map(|blocks| blocks.iter().map(|block| block.hash).collect())
            .unwrap_or_default())
    }
}
