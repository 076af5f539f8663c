//! Listener configuration and state types.

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::retry::RetryConfig;
use crate::types::BidPolicy;

/// Configuration for a listener instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Unique name for this listener (used for checkpoint keys).
    pub id: String,
    /// Chain slug (e.g. `"ethereum"`).
    pub chain: String,
    /// Auction contract to follow, `0x`-prefixed.
    pub contract_address: String,
    /// First block to scan when nothing has been applied yet.
    pub start_block: u64,
    /// How many blocks to fetch per `eth_getLogs` call.
    pub batch_size: u64,
    /// Wait between polls while no subscription is available (milliseconds).
    pub poll_interval_ms: u64,
    /// Save a checkpoint every N applied logs.
    pub checkpoint_interval: u64,
    /// Backoff for events whose auction does not exist yet.
    pub parent_retry: RetryConfig,
    /// Backoff for RPC and subscription failures.
    pub connection_retry: RetryConfig,
    pub bid_policy: BidPolicy,
    /// Try to return to push mode after a poll catch-up.
    pub resubscribe: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            id: "auctions".into(),
            chain: "ethereum".into(),
            contract_address: String::new(),
            start_block: 0,
            batch_size: 1000,
            poll_interval_ms: 5000,
            checkpoint_interval: 1,
            parent_retry: RetryConfig::default(),
            connection_retry: RetryConfig {
                max_retries: u32::MAX,
                initial_backoff_ms: 1000,
                max_backoff_ms: 30_000,
                multiplier: 2.0,
            },
            bid_policy: BidPolicy::default(),
            resubscribe: true,
        }
    }
}

impl ListenerConfig {
    /// Reject configurations ingestion cannot start with.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.id.is_empty() {
            return Err(IndexerError::Config("listener id must not be empty".into()));
        }
        if !is_hex_address(&self.contract_address) {
            return Err(IndexerError::Config(format!(
                "invalid contract address '{}'",
                self.contract_address
            )));
        }
        if self.batch_size == 0 {
            return Err(IndexerError::Config("batch_size must be > 0".into()));
        }
        Ok(())
    }
}

fn is_hex_address(s: &str) -> bool {
    s.strip_prefix("0x")
        .is_some_and(|h| h.len() == 40 && h.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Runtime state of the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListenerState {
    /// Resuming the cursor and attempting the first subscription.
    Starting,
    /// Following pushed logs.
    Subscribed,
    /// Fetching ranges with `eth_getLogs`.
    Polling,
    /// Terminated.
    Stopped,
}

impl std::fmt::Display for ListenerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Subscribed => write!(f, "subscribed"),
            Self::Polling => write!(f, "polling"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(addr: &str) -> ListenerConfig {
        ListenerConfig {
            contract_address: addr.into(),
            ..Default::default()
        }
    }

    #[test]
    fn validate_accepts_mixed_case_address() {
        assert!(config("0xD8dA6BF26964aF9D7eEd9e03E53415D37aA96045").validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_input() {
        assert!(config("").validate().unwrap_err().is_fatal());
        assert!(config("d8da6bf26964af9d7eed9e03e53415d37aa96045").validate().is_err());
        assert!(config("0xd8da6bf2").validate().is_err());
        assert!(config("0xzz").validate().is_err());

        let mut cfg = config("0xd8da6bf26964af9d7eed9e03e53415d37aa96045");
        cfg.batch_size = 0;
        assert!(matches!(cfg.validate(), Err(IndexerError::Config(_))));
    }

    #[test]
    fn deserializes_with_defaults() {
        let cfg: ListenerConfig =
            serde_json::from_str(r#"{"contract_address":"0x01","bid_policy":"require_increasing"}"#)
                .unwrap();
        assert_eq!(cfg.bid_policy, BidPolicy::RequireIncreasing);
        assert_eq!(cfg.batch_size, 1000);
        assert!(cfg.resubscribe);
    }

    #[test]
    fn state_display() {
        assert_eq!(ListenerState::Subscribed.to_string(), "subscribed");
        assert_eq!(ListenerState::Polling.to_string(), "polling");
    }
}
