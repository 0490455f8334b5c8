//! Delegate proxies: per-node stubs that own upstream filters and fan their
//! change streams out to client cursors.

mod poll;
mod stub;

pub use stub::{ProxyStub, StubState};
