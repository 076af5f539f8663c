//! In-memory storage backend.
//!
//! Stores auctions, bids, dead letters and checkpoints in RAM behind a
//! single mutex, so every event's effects land in one critical section.
//! Useful for testing and short-lived listeners that don't need persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use auctionindex_core::checkpoint::{Checkpoint, CheckpointStore};
use auctionindex_core::error::IndexerError;
use auctionindex_core::store::{AuctionStore, StoreCounts};
use auctionindex_core::types::{
    ApplyOutcome, AuctionRecord, BidPolicy, BidRecord, Settlement, UnreconciledEvent,
};

#[derive(Default)]
struct State {
    auctions: BTreeMap<u64, AuctionRecord>,
    bids: HashMap<String, BidRecord>,
    unreconciled: BTreeMap<(String, u32), UnreconciledEvent>,
    checkpoints: HashMap<String, Checkpoint>,
}

/// In-memory auction storage.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    state: Mutex<State>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl AuctionStore for InMemoryStorage {
    async fn insert_auction(&self, record: &AuctionRecord) -> Result<ApplyOutcome, IndexerError> {
        let mut state = self.lock();
        if state.auctions.contains_key(&record.auction_id) {
            return Ok(ApplyOutcome::Duplicate);
        }
        state.auctions.insert(record.auction_id, record.clone());
        Ok(ApplyOutcome::Applied)
    }

    async fn apply_bid(
        &self,
        bid: &BidRecord,
        policy: BidPolicy,
    ) -> Result<ApplyOutcome, IndexerError> {
        let mut state = self.lock();
        if state.bids.contains_key(&bid.tx_hash) {
            return Ok(ApplyOutcome::Duplicate);
        }
        let auction = state
            .auctions
            .get_mut(&bid.auction_id)
            .ok_or(IndexerError::ParentMissing {
                auction_id: bid.auction_id,
            })?;
        let outcome = auction.apply_bid(bid, policy);
        if outcome.is_applied() {
            state.bids.insert(bid.tx_hash.clone(), bid.clone());
        }
        Ok(outcome)
    }

    async fn apply_settlement(&self, settlement: &Settlement) -> Result<ApplyOutcome, IndexerError> {
        let mut state = self.lock();
        let auction = state
            .auctions
            .get_mut(&settlement.auction_id)
            .ok_or(IndexerError::ParentMissing {
                auction_id: settlement.auction_id,
            })?;
        Ok(auction.apply_settlement(settlement))
    }

    async fn record_unreconciled(&self, event: &UnreconciledEvent) -> Result<(), IndexerError> {
        self.lock()
            .unreconciled
            .entry((event.tx_hash.clone(), event.log_index))
            .or_insert_with(|| event.clone());
        Ok(())
    }

    async fn auction(&self, auction_id: u64) -> Result<Option<AuctionRecord>, IndexerError> {
        Ok(self.lock().auctions.get(&auction_id).cloned())
    }

    async fn bid(&self, tx_hash: &str) -> Result<Option<BidRecord>, IndexerError> {
        Ok(self.lock().bids.get(&tx_hash.to_lowercase()).cloned())
    }

    async fn bids_for_auction(&self, auction_id: u64) -> Result<Vec<BidRecord>, IndexerError> {
        let mut bids: Vec<BidRecord> = self
            .lock()
            .bids
            .values()
            .filter(|b| b.auction_id == auction_id)
            .cloned()
            .collect();
        bids.sort_by(|a, b| (b.block_number, b.log_index).cmp(&(a.block_number, a.log_index)));
        Ok(bids)
    }

    async fn unreconciled(&self) -> Result<Vec<UnreconciledEvent>, IndexerError> {
        let mut events: Vec<UnreconciledEvent> = self.lock().unreconciled.values().cloned().collect();
        events.sort_by_key(|e| (e.block_number, e.log_index));
        Ok(events)
    }

    async fn last_applied_block(&self) -> Result<Option<u64>, IndexerError> {
        Ok(self.lock().auctions.values().map(|a| a.updated_block).max())
    }

    async fn counts(&self) -> Result<StoreCounts, IndexerError> {
        let state = self.lock();
        Ok(StoreCounts {
            auctions: state.auctions.len() as u64,
            ended_auctions: state.auctions.values().filter(|a| a.ended).count() as u64,
            bids: state.bids.len() as u64,
            unreconciled: state.unreconciled.len() as u64,
        })
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStorage {
    async fn load(
        &self,
        chain_id: &str,
        indexer_id: &str,
    ) -> Result<Option<Checkpoint>, IndexerError> {
        let key = format!("{chain_id}:{indexer_id}");
        Ok(self.lock().checkpoints.get(&key).cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError> {
        let key = format!("{}:{}", checkpoint.chain_id, checkpoint.indexer_id);
        self.lock().checkpoints.insert(key, checkpoint);
        Ok(())
    }

    async fn delete(&self, chain_id: &str, indexer_id: &str) -> Result<(), IndexerError> {
        let key = format!("{chain_id}:{indexer_id}");
        self.lock().checkpoints.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{auction, bid, dead_letter, settlement};

    #[tokio::test]
    async fn duplicate_creation_is_a_noop() {
        let store = InMemoryStorage::new();
        assert_eq!(store.insert_auction(&auction(7, 10)).await.unwrap(), ApplyOutcome::Applied);

        let mut changed = auction(7, 99);
        changed.seller = "0xdead".into();
        assert_eq!(store.insert_auction(&changed).await.unwrap(), ApplyOutcome::Duplicate);
        assert_eq!(store.auction(7).await.unwrap().unwrap().created_block, 10);
    }

    #[tokio::test]
    async fn bid_updates_parent_and_is_idempotent() {
        let store = InMemoryStorage::new();
        store.insert_auction(&auction(7, 10)).await.unwrap();

        let b = bid(7, "0xb1", "1500", 11, 0);
        assert!(store.apply_bid(&b, BidPolicy::TrustContract).await.unwrap().is_applied());
        assert_eq!(
            store.apply_bid(&b, BidPolicy::TrustContract).await.unwrap(),
            ApplyOutcome::Duplicate
        );

        let a = store.auction(7).await.unwrap().unwrap();
        assert_eq!(a.bid_count, 1);
        assert_eq!(a.highest_bid, "1500");
        assert_eq!(store.bids_for_auction(7).await.unwrap().len(), 1);
        assert!(store.bid("0xB1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn orphan_bid_writes_nothing() {
        let store = InMemoryStorage::new();
        let err = store
            .apply_bid(&bid(9, "0xb1", "1", 11, 0), BidPolicy::TrustContract)
            .await
            .unwrap_err();
        assert!(err.is_parent_missing());
        assert!(store.bid("0xb1").await.unwrap().is_none());
        assert!(store
            .apply_settlement(&settlement(9, "1", 12))
            .await
            .unwrap_err()
            .is_parent_missing());
    }

    #[tokio::test]
    async fn stale_bid_is_not_stored() {
        let store = InMemoryStorage::new();
        store.insert_auction(&auction(7, 10)).await.unwrap();
        store.apply_settlement(&settlement(7, "1600", 20)).await.unwrap();

        let out = store
            .apply_bid(&bid(7, "0xlate", "5000", 21, 0), BidPolicy::TrustContract)
            .await
            .unwrap();
        assert_eq!(out, ApplyOutcome::Stale);
        assert!(store.bid("0xlate").await.unwrap().is_none());
        let a = store.auction(7).await.unwrap().unwrap();
        assert_eq!(a.bid_count, 0);
        assert_eq!(a.highest_bid, "1600");
    }

    #[tokio::test]
    async fn bids_are_listed_newest_first() {
        let store = InMemoryStorage::new();
        store.insert_auction(&auction(7, 10)).await.unwrap();
        for (tx, block, idx) in [("0x1", 11, 0), ("0x2", 12, 3), ("0x3", 12, 1)] {
            store.apply_bid(&bid(7, tx, "1", block, idx), BidPolicy::TrustContract).await.unwrap();
        }
        let order: Vec<String> = store
            .bids_for_auction(7)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.tx_hash)
            .collect();
        assert_eq!(order, ["0x2", "0x3", "0x1"]);
        assert_eq!(store.last_applied_block().await.unwrap(), Some(12));
    }

    #[tokio::test]
    async fn unreconciled_is_deduplicated() {
        let store = InMemoryStorage::new();
        store.record_unreconciled(&dead_letter("0xe", 2)).await.unwrap();
        store.record_unreconciled(&dead_letter("0xe", 2)).await.unwrap();
        store.record_unreconciled(&dead_letter("0xe", 3)).await.unwrap();
        assert_eq!(store.unreconciled().await.unwrap().len(), 2);
        assert_eq!(store.counts().await.unwrap().unreconciled, 2);
    }

    #[tokio::test]
    async fn checkpoint_roundtrip() {
        let store = InMemoryStorage::new();
        let cp = Checkpoint {
            chain_id: "ethereum".into(),
            indexer_id: "test".into(),
            block_number: 1000,
            log_index: 4,
            updated_at: 0,
        };
        store.save(cp).await.unwrap();
        let loaded = store.load("ethereum", "test").await.unwrap().unwrap();
        assert_eq!(loaded.block_number, 1000);
        assert_eq!(loaded.log_index, 4);

        store.delete("ethereum", "test").await.unwrap();
        assert!(store.load("ethereum", "test").await.unwrap().is_none());
    }
}
