//! Upstream node clients: the filter RPC seam and the shared client pool.

mod client;
mod pool;

pub use client::{FilterRpc, NodeClient};
pub use pool::{ClientPool, node_name};
