//! auctionindex-core: domain model and reconciliation engine for an NFT
//! auction contract's event log.
//!
//! # Architecture
//!
//! ```text
//! ListenerBuilder → Supervisor (auctionindex-evm)
//!                      ├── ChainSource       (push subscription / range polling)
//!                      ├── EventDecoder      (raw log → DomainEvent)
//!                      ├── Reconciler        (per-auction ordering, parent retry)
//!                      ├── CheckpointManager (crash recovery)
//!                      └── AuctionStore      (memory / SQLite)
//! ```

pub mod checkpoint;
pub mod cursor;
pub mod error;
pub mod events;
pub mod listener;
pub mod reconciler;
pub mod retry;
pub mod store;
pub mod types;

pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointStore};
pub use cursor::Cursor;
pub use error::IndexerError;
pub use events::{AuctionCreated, AuctionEnded, BidPlaced, ChainEvent, DomainEvent, EventMeta};
pub use listener::{ListenerConfig, ListenerState};
pub use reconciler::{ReconcileStats, Reconciled, Reconciler};
pub use retry::{RetryConfig, RetryPolicy};
pub use store::{AuctionStore, StoreCounts};
pub use types::{
    ApplyOutcome, AuctionRecord, BidPolicy, BidRecord, LogFilter, LogPosition, Settlement,
    UnreconciledEvent, ZERO_ADDRESS,
};
