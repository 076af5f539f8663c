//! Error types for the auctionindex pipeline.

use thiserror::Error;

/// Errors that can occur during ingestion and reconciliation.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// A JSON-RPC request (head lookup, `eth_getLogs`) failed.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// A push subscription could not be established.
    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    /// An established push subscription broke mid-stream.
    #[error("Stream error: {0}")]
    Stream(String),

    /// A raw log could not be decoded into a domain event.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The auction an event refers to has not been created (yet).
    #[error("Auction {auction_id} not found (parent missing)")]
    ParentMissing { auction_id: u64 },

    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid or missing configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl IndexerError {
    /// Returns `true` if the chain source could not be reached or dropped us.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Subscribe(_) | Self::Stream(_))
    }

    /// Returns `true` if the error is the recoverable "parent missing" case.
    pub fn is_parent_missing(&self) -> bool {
        matches!(self, Self::ParentMissing { .. })
    }

    /// Returns `true` if ingestion must not proceed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(IndexerError::Subscribe("refused".into()).is_connection());
        assert!(IndexerError::Stream("closed".into()).is_connection());
        assert!(!IndexerError::Storage("locked".into()).is_connection());
        assert!(IndexerError::ParentMissing { auction_id: 7 }.is_parent_missing());
        assert!(IndexerError::Config("bad address".into()).is_fatal());
        assert!(!IndexerError::Decode("short data".into()).is_fatal());
    }

    #[test]
    fn parent_missing_message() {
        let e = IndexerError::ParentMissing { auction_id: 42 };
        assert_eq!(e.to_string(), "Auction 42 not found (parent missing)");
    }
}
