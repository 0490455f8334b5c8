//! Log ingestion into the transactional read-through store.

mod ingestor;
mod store;

pub use ingestor::LogIngestor;
pub use store::{
    BlockData, BlockSummary, EpochData, LogStore, ReceiptRecord, TxnRecord, short_hash_id,
};
