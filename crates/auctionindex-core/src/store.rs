//! The reconciliation store: durable projection of auction and bid state.
//!
//! Every write method is one atomic unit: a concurrent reader sees either
//! none or all of an event's effects. Uniqueness of `auction_id` and
//! `tx_hash` is enforced by the implementation, not assumed by callers.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::IndexerError;
use crate::types::{
    ApplyOutcome, AuctionRecord, BidPolicy, BidRecord, Settlement, UnreconciledEvent,
};

/// Storage backend for auction state.
///
/// Implementations: `InMemoryStorage`, `SqliteStorage`.
#[async_trait]
pub trait AuctionStore: Send + Sync {
    /// Insert a newly created auction. An existing id yields `Duplicate`.
    async fn insert_auction(&self, record: &AuctionRecord) -> Result<ApplyOutcome, IndexerError>;

    /// Store `bid` and fold it into its auction, atomically.
    ///
    /// - known `tx_hash` → `Duplicate`
    /// - parent auction absent → `Err(ParentMissing)`, nothing written
    /// - otherwise the outcome of [`AuctionRecord::apply_bid`]; the bid row
    ///   is written only when that is `Applied`
    async fn apply_bid(
        &self,
        bid: &BidRecord,
        policy: BidPolicy,
    ) -> Result<ApplyOutcome, IndexerError>;

    /// Mark an auction ended with its final tally.
    ///
    /// Parent absent → `Err(ParentMissing)`; already ended → `Duplicate`.
    async fn apply_settlement(&self, settlement: &Settlement) -> Result<ApplyOutcome, IndexerError>;

    /// Persist a dead-lettered event. Recording the same
    /// `(tx_hash, log_index)` twice is a no-op.
    async fn record_unreconciled(&self, event: &UnreconciledEvent) -> Result<(), IndexerError>;

    async fn auction(&self, auction_id: u64) -> Result<Option<AuctionRecord>, IndexerError>;

    async fn bid(&self, tx_hash: &str) -> Result<Option<BidRecord>, IndexerError>;

    /// Bids for an auction, newest (highest block, log index) first.
    async fn bids_for_auction(&self, auction_id: u64) -> Result<Vec<BidRecord>, IndexerError>;

    async fn unreconciled(&self) -> Result<Vec<UnreconciledEvent>, IndexerError>;

    /// Highest block number across applied auctions and bids.
    ///
    /// Fallback resume point when no checkpoint exists.
    async fn last_applied_block(&self) -> Result<Option<u64>, IndexerError>;

    async fn counts(&self) -> Result<StoreCounts, IndexerError>;
}

/// Row counts, for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub auctions: u64,
    pub ended_auctions: u64,
    pub bids: u64,
    pub unreconciled: u64,
}
