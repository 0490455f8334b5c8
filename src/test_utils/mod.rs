//! Test doubles for the upstream seam and the store contract.

mod fixtures;
mod memory_store;
mod mock_client;

pub use fixtures::{LogFixture, log_at};
pub use memory_store::MemoryStore;
pub use mock_client::MockFilterClient;
