//! Turns polled log batches into transactional epoch writes.

use std::{collections::HashMap, sync::Arc};

use alloy::rpc::types::Log;
use tracing::{debug, warn};

use crate::{
    VirtualFilterError,
    ingest::store::{BlockData, BlockSummary, EpochData, LogStore, ReceiptRecord},
    types::LogBatch,
};

/// Persists log batches pulled by the poll loops into the read-through
/// store.
///
/// The ingestor holds no state beyond the store handle. It acts on an owned
/// copy of each batch and never blocks the fan-out path: callers hand
/// batches off via [`LogIngestor::spawn_ingest`], and persistence failures
/// are logged, not propagated.
#[derive(Debug)]
pub struct LogIngestor<S> {
    store: Arc<S>,
}

impl<S> Clone for LogIngestor<S> {
    fn clone(&self) -> Self {
        Self { store: self.store.clone() }
    }
}

impl<S: LogStore> LogIngestor<S> {
    /// Creates an ingestor writing to `store`.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Persists the batch on a background task, best-effort.
    pub fn spawn_ingest(&self, batch: LogBatch) {
        let ingestor = self.clone();
        tokio::spawn(async move {
            if let Err(error) = ingestor.ingest(batch).await {
                warn!(error = %error, "Failed to persist polled log batch");
            }
        });
    }

    /// Persists one batch: removes any reverted range first, then writes the
    /// surviving logs as epoch slices.
    ///
    /// # Errors
    ///
    /// Returns [`VirtualFilterError::Store`] when the store rejects the
    /// write; the batch is left unpersisted (the store rolls back).
    pub async fn ingest(&self, batch: LogBatch) -> Result<(), VirtualFilterError> {
        if batch.is_empty() {
            return Ok(());
        }

        // Reorg retractions revert whole epochs; delete the reverted range
        // before persisting replacement data.
        if let Some(reverted_from) = batch.reorged_from {
            debug!(
                from_epoch = reverted_from,
                to_epoch = batch.to_block,
                "Removing reverted epoch range"
            );
            self.store.remove(reverted_from, batch.to_block).await?;
        }

        let slice = build_epoch_slice(&batch.logs);
        if slice.is_empty() {
            return Ok(());
        }

        debug!(
            epochs = slice.len(),
            from_block = batch.from_block,
            to_block = batch.to_block,
            "Persisting polled log batch"
        );
        self.store.put_epoch_data_slice(slice).await
    }
}

/// Groups logs into per-epoch writes: one [`EpochData`] per block number,
/// blocks in delivery order with the last flagged as pivot, receipts keyed
/// by transaction hash.
///
/// Retracted (`removed`) logs and pending logs without confirmed block
/// metadata are dropped here; the former were handled by range removal, the
/// latter cannot be persisted yet.
fn build_epoch_slice(logs: &[Log]) -> Vec<EpochData> {
    let mut epochs: Vec<EpochData> = Vec::new();
    let mut index: HashMap<u64, usize> = HashMap::new();

    for log in logs {
        if log.removed {
            continue;
        }
        let (Some(number), Some(block_hash), Some(tx_hash)) =
            (log.block_number, log.block_hash, log.transaction_hash)
        else {
            debug!("Skipping log without confirmed block metadata");
            continue;
        };

        let slot = *index.entry(number).or_insert_with(|| {
            epochs.push(EpochData { epoch: number, ..EpochData::default() });
            epochs.len() - 1
        });
        let epoch = &mut epochs[slot];

        let block = match epoch.blocks.iter_mut().find(|b| b.summary.hash == block_hash) {
            Some(block) => block,
            None => {
                epoch.blocks.push(BlockData {
                    summary: BlockSummary {
                        hash: block_hash,
                        number,
                        epoch: number,
                        pivot: false,
                    },
                    txns: Vec::new(),
                });
                epoch.blocks.last_mut().expect("just pushed")
            }
        };

        if !block.txns.contains(&tx_hash) {
            block.txns.push(tx_hash);
        }

        epoch
            .receipts
            .entry(tx_hash)
            .or_insert_with(|| ReceiptRecord { tx_hash, logs: Vec::new() })
            .logs
            .push(log.clone());
    }

    for epoch in &mut epochs {
        if let Some(last) = epoch.blocks.last_mut() {
            last.summary.pivot = true;
        }
    }

    epochs
}
