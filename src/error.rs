use std::sync::Arc;

use alloy::transports::{RpcError, TransportErrorKind};
use thiserror::Error;

/// Errors surfaced by the virtual filter layer.
#[derive(Error, Debug, Clone)]
pub enum VirtualFilterError {
    /// The client-visible filter id is unknown, or the upstream node reported
    /// its delegate filter missing.
    #[error("filter not found")]
    FilterNotFound,

    /// The filter query is malformed, ambiguous, or exceeds configured limits.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// The upstream node could not be reached or returned a transport-level
    /// failure. Transient; the poll loop retries these with backoff.
    #[error("upstream unavailable: {0}")]
    Upstream(Arc<RpcError<TransportErrorKind>>),

    /// The log store failed a read or write. Never surfaced on client read
    /// paths, which fall through to the upstream node instead.
    #[error("store error: {0}")]
    Store(String),

    /// Invariant violation inside the layer itself. Should not occur.
    #[error("internal error: {0}")]
    Internal(String),
}

impl VirtualFilterError {
    /// True if this error means the referenced filter no longer exists,
    /// locally or upstream.
    #[must_use]
    pub fn is_filter_not_found(&self) -> bool {
        matches!(self, Self::FilterNotFound)
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidFilter(msg.into())
    }

    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<RpcError<TransportErrorKind>> for VirtualFilterError {
    fn from(error: RpcError<TransportErrorKind>) -> Self {
        // Full nodes report a dropped filter through the error payload rather
        // than a distinct code; fold it into the not-found kind so callers can
        // cascade cleanup uniformly.
        if let RpcError::ErrorResp(payload) = &error
            && payload.message.to_lowercase().contains("filter not found")
        {
            return Self::FilterNotFound;
        }

        Self::Upstream(Arc::new(error))
    }
}
