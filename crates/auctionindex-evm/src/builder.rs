//! Fluent builder API for creating auction listeners.
//!
//! # Example
//!
//! ```rust,no_run
//! use auctionindex_evm::ListenerBuilder;
//!
//! let config = ListenerBuilder::new()
//!     .chain("ethereum")
//!     .contract("0x5FbDB2315678afecb367f032d93F642f64180aa3")
//!     .start_block(19_000_000)
//!     .batch_size(500)
//!     .build_config();
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use auctionindex_core::checkpoint::CheckpointStore;
use auctionindex_core::error::IndexerError;
use auctionindex_core::listener::ListenerConfig;
use auctionindex_core::retry::RetryConfig;
use auctionindex_core::store::AuctionStore;
use auctionindex_core::types::BidPolicy;

use crate::source::ChainSource;
use crate::supervisor::Supervisor;

/// Fluent builder for `ListenerConfig` and [`Supervisor`].
#[derive(Default)]
pub struct ListenerBuilder {
    config: ListenerConfig,
    source: Option<Arc<dyn ChainSource>>,
    store: Option<Arc<dyn AuctionStore>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    cancel: Option<CancellationToken>,
}

impl ListenerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: ListenerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Set the listener ID (used for checkpoint keys).
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.config.chain = chain.into();
        self
    }

    /// Set the auction contract address.
    pub fn contract(mut self, address: impl Into<String>) -> Self {
        self.config.contract_address = address.into();
        self
    }

    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = block;
        self
    }

    /// Set the number of blocks per `eth_getLogs` batch.
    pub fn batch_size(mut self, size: u64) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Set checkpoint save interval (every N applied logs).
    pub fn checkpoint_interval(mut self, n: u64) -> Self {
        self.config.checkpoint_interval = n;
        self
    }

    pub fn parent_retry(mut self, retry: RetryConfig) -> Self {
        self.config.parent_retry = retry;
        self
    }

    pub fn connection_retry(mut self, retry: RetryConfig) -> Self {
        self.config.connection_retry = retry;
        self
    }

    pub fn bid_policy(mut self, policy: BidPolicy) -> Self {
        self.config.bid_policy = policy;
        self
    }

    /// Whether to go back to push mode after a poll catch-up.
    pub fn resubscribe(mut self, enabled: bool) -> Self {
        self.config.resubscribe = enabled;
        self
    }

    pub fn source(mut self, source: Arc<dyn ChainSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn store(mut self, store: Arc<dyn AuctionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    /// Token that stops the listener; a fresh one is created if unset.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Build the `ListenerConfig`.
    pub fn build_config(self) -> ListenerConfig {
        self.config
    }

    /// Validate the configuration and assemble a [`Supervisor`].
    pub fn build(self) -> Result<Supervisor, IndexerError> {
        self.config.validate()?;
        let source = self
            .source
            .ok_or_else(|| IndexerError::Config("no chain source configured".into()))?;
        let store = self
            .store
            .ok_or_else(|| IndexerError::Config("no auction store configured".into()))?;
        let checkpoints = self
            .checkpoints
            .ok_or_else(|| IndexerError::Config("no checkpoint store configured".into()))?;
        Ok(Supervisor::new(
            self.config,
            source,
            store,
            checkpoints,
            self.cancel.unwrap_or_default(),
        ))
    }
}
