//! Log fixtures shared by unit and integration tests.

use alloy::{
    primitives::{Address, B256, Bytes, LogData},
    rpc::types::Log,
};

/// Builder for confirmed log fixtures.
#[derive(Clone, Debug)]
pub struct LogFixture {
    block: u64,
    address: Address,
    topics: Vec<B256>,
    log_index: u64,
    tx_byte: u8,
    removed: bool,
}

impl LogFixture {
    /// A log at `block` emitted by `address`. The transaction hash defaults
    /// to one derived from the block number, so logs in different blocks
    /// come from different transactions.
    #[must_use]
    pub fn new(block: u64, address: Address) -> Self {
        let tx_byte = u8::try_from(block % 251).unwrap_or(0);
        Self { block, address, topics: Vec::new(), log_index: 0, tx_byte, removed: false }
    }

    /// Sets the log's topics.
    #[must_use]
    pub fn topics(mut self, topics: Vec<B256>) -> Self {
        self.topics = topics;
        self
    }

    /// Sets the log index within the block.
    #[must_use]
    pub fn log_index(mut self, index: u64) -> Self {
        self.log_index = index;
        self
    }

    /// Sets the byte the transaction hash is derived from.
    #[must_use]
    pub fn tx_byte(mut self, byte: u8) -> Self {
        self.tx_byte = byte;
        self
    }

    /// Marks the log as retracted by a reorg.
    #[must_use]
    pub fn removed(mut self) -> Self {
        self.removed = true;
        self
    }

    /// Builds the log.
    #[must_use]
    pub fn build(self) -> Log {
        let mut log = Log::default();
        log.inner = alloy::primitives::Log {
            address: self.address,
            data: LogData::new_unchecked(self.topics, Bytes::new()),
        };
        log.block_number = Some(self.block);
        log.block_hash = Some(B256::with_last_byte(u8::try_from(self.block % 251).unwrap_or(0)));
        log.transaction_hash = Some(B256::repeat_byte(self.tx_byte));
        log.transaction_index = Some(0);
        log.log_index = Some(self.log_index);
        log.removed = self.removed;
        log
    }
}

/// A confirmed log at `block` emitted by `address`.
#[must_use]
pub fn log_at(block: u64, address: Address) -> Log {
    LogFixture::new(block, address).build()
}
