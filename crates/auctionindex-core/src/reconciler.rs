//! Reconciler: applies decoded events to the store, in per-auction order.
//!
//! The store rejects a bid or settlement whose auction does not exist yet
//! with `ParentMissing`. Such events are parked in a per-auction FIFO and
//! retried with backoff; once the retry policy gives up they are written to
//! the dead-letter table. Later events for an auction with a parked event
//! queue behind it, so per-auction chain order holds.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::IndexerError;
use crate::events::{ChainEvent, DomainEvent};
use crate::retry::RetryPolicy;
use crate::store::AuctionStore;
use crate::types::{
    ApplyOutcome, AuctionRecord, BidPolicy, BidRecord, LogPosition, Settlement, UnreconciledEvent,
};

/// What happened to one event handed to [`Reconciler::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// The store ran the transition.
    Outcome(ApplyOutcome),
    /// Not an auction event.
    Ignored,
    /// Parked until its auction exists.
    Deferred,
}

/// Running totals of reconciliation outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub applied: u64,
    pub duplicates: u64,
    pub stale: u64,
    pub not_increasing: u64,
    pub unknown: u64,
    pub deferred: u64,
    pub unreconciled: u64,
}

#[derive(Debug)]
struct PendingEvent {
    event: ChainEvent,
    /// Failed attempts so far; 0 while only queued behind another event.
    attempts: u32,
    due: Instant,
    reason: String,
}

pub struct Reconciler {
    store: Arc<dyn AuctionStore>,
    bid_policy: BidPolicy,
    retry: RetryPolicy,
    pending: BTreeMap<u64, VecDeque<PendingEvent>>,
    stats: ReconcileStats,
}

impl Reconciler {
    pub fn new(store: Arc<dyn AuctionStore>, bid_policy: BidPolicy, retry: RetryPolicy) -> Self {
        Self {
            store,
            bid_policy,
            retry,
            pending: BTreeMap::new(),
            stats: ReconcileStats::default(),
        }
    }

    pub fn stats(&self) -> ReconcileStats {
        self.stats
    }

    /// Number of parked events.
    pub fn pending_len(&self) -> usize {
        self.pending.values().map(VecDeque::len).sum()
    }

    /// Earliest chain position still parked. The cursor must stay below it.
    pub fn oldest_pending(&self) -> Option<LogPosition> {
        self.pending
            .values()
            .flat_map(|q| q.iter().map(|p| p.event.position()))
            .min()
    }

    /// When the next parked event becomes due.
    pub fn next_due(&self) -> Option<Instant> {
        self.pending
            .values()
            .filter_map(|q| q.front().map(|p| p.due))
            .min()
    }

    /// Apply one event.
    ///
    /// Only store-class errors are returned; `ParentMissing` is absorbed
    /// into the pending queue.
    pub async fn apply(&mut self, event: ChainEvent) -> Result<Reconciled, IndexerError> {
        let Some(auction_id) = event.event.auction_id() else {
            self.stats.unknown += 1;
            debug!(position = %event.position(), tx = %event.meta.tx_hash, "ignoring unknown event");
            return Ok(Reconciled::Ignored);
        };
        let creates = matches!(event.event, DomainEvent::AuctionCreated(_));

        if !creates {
            if let Some(queue) = self.pending.get_mut(&auction_id) {
                if !queue.iter().any(|p| p.event.meta == event.meta) {
                    debug!(auction_id, position = %event.position(), "queued behind pending event");
                    queue.push_back(PendingEvent {
                        event,
                        attempts: 0,
                        due: Instant::now(),
                        reason: "queued behind pending event".into(),
                    });
                    self.stats.deferred += 1;
                }
                return Ok(Reconciled::Deferred);
            }
        }

        match self.execute(&event).await {
            Ok(outcome) => {
                self.record(outcome, &event);
                if creates {
                    self.retry_auction(auction_id, true).await?;
                }
                Ok(Reconciled::Outcome(outcome))
            }
            Err(IndexerError::ParentMissing { .. }) => {
                self.stats.deferred += 1;
                match self.retry.next_delay(1) {
                    Some(delay) => {
                        warn!(
                            auction_id,
                            event = event.event.name(),
                            position = %event.position(),
                            retry_in_ms = delay.as_millis() as u64,
                            "auction not found, deferring event"
                        );
                        self.pending.entry(auction_id).or_default().push_back(PendingEvent {
                            event,
                            attempts: 1,
                            due: Instant::now() + delay,
                            reason: format!("auction {auction_id} not found"),
                        });
                    }
                    None => {
                        let parked = PendingEvent {
                            event,
                            attempts: 1,
                            due: Instant::now(),
                            reason: format!("auction {auction_id} not found"),
                        };
                        self.dead_letter(&parked).await?;
                    }
                }
                Ok(Reconciled::Deferred)
            }
            Err(e) => Err(e),
        }
    }

    /// Retry every parked event whose due time has passed.
    pub async fn retry_due(&mut self) -> Result<(), IndexerError> {
        let ids: Vec<u64> = self.pending.keys().copied().collect();
        for id in ids {
            self.retry_auction(id, false).await?;
        }
        Ok(())
    }

    /// Drive all parked events to a final outcome, sleeping until each is
    /// due. Returns early (leaving events parked) when `cancel` fires.
    pub async fn flush_pending(&mut self, cancel: &CancellationToken) -> Result<(), IndexerError> {
        while let Some(due) = self.next_due() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep_until(due) => {}
            }
            self.retry_due().await?;
        }
        Ok(())
    }

    /// Retry the parked events of one auction, head first, stopping at the
    /// first one that still cannot be applied.
    async fn retry_auction(&mut self, auction_id: u64, force: bool) -> Result<(), IndexerError> {
        loop {
            let now = Instant::now();
            let event = match self.pending.get(&auction_id).and_then(|q| q.front()) {
                Some(head) if force || head.due <= now => head.event.clone(),
                Some(_) => return Ok(()),
                None => {
                    self.pending.remove(&auction_id);
                    return Ok(());
                }
            };

            match self.execute(&event).await {
                Ok(outcome) => {
                    self.pop_head(auction_id);
                    info!(auction_id, event = event.event.name(), position = %event.position(), "deferred event reconciled");
                    self.record(outcome, &event);
                }
                Err(IndexerError::ParentMissing { .. }) => {
                    let Some(head) = self.pending.get_mut(&auction_id).and_then(|q| q.front_mut())
                    else {
                        return Ok(());
                    };
                    head.attempts += 1;
                    match self.retry.next_delay(head.attempts) {
                        Some(delay) => {
                            head.due = now + delay;
                            debug!(auction_id, attempts = head.attempts, "auction still missing");
                            return Ok(());
                        }
                        None => {
                            let dead = PendingEvent {
                                event,
                                attempts: head.attempts,
                                due: now,
                                reason: head.reason.clone(),
                            };
                            self.dead_letter(&dead).await?;
                            self.pop_head(auction_id);
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn pop_head(&mut self, auction_id: u64) {
        if let Some(queue) = self.pending.get_mut(&auction_id) {
            queue.pop_front();
            if queue.is_empty() {
                self.pending.remove(&auction_id);
            }
        }
    }

    async fn execute(&self, event: &ChainEvent) -> Result<ApplyOutcome, IndexerError> {
        match &event.event {
            DomainEvent::AuctionCreated(e) => {
                self.store
                    .insert_auction(&AuctionRecord::from_created(e, &event.meta))
                    .await
            }
            DomainEvent::BidPlaced(e) => {
                self.store
                    .apply_bid(&BidRecord::from_event(e, &event.meta), self.bid_policy)
                    .await
            }
            DomainEvent::AuctionEnded(e) => {
                self.store
                    .apply_settlement(&Settlement::from_event(e, &event.meta))
                    .await
            }
            DomainEvent::Unknown { .. } => Err(IndexerError::Decode(format!(
                "unknown event at {}",
                event.position()
            ))),
        }
    }

    async fn dead_letter(&mut self, parked: &PendingEvent) -> Result<(), IndexerError> {
        let ev = &parked.event;
        let record = UnreconciledEvent {
            tx_hash: ev.meta.tx_hash.to_lowercase(),
            log_index: ev.meta.log_index,
            block_number: ev.meta.block_number,
            auction_id: ev.event.auction_id().unwrap_or_default(),
            kind: ev.event.name().to_string(),
            attempts: parked.attempts,
            reason: parked.reason.clone(),
            recorded_at: chrono::Utc::now().timestamp(),
        };
        self.store.record_unreconciled(&record).await?;
        self.stats.unreconciled += 1;
        error!(
            auction_id = record.auction_id,
            event = %record.kind,
            tx = %record.tx_hash,
            attempts = record.attempts,
            "giving up on event, recorded as unreconciled"
        );
        Ok(())
    }

    fn record(&mut self, outcome: ApplyOutcome, event: &ChainEvent) {
        let auction_id = event.event.auction_id().unwrap_or_default();
        match outcome {
            ApplyOutcome::Applied => {
                self.stats.applied += 1;
                info!(auction_id, event = event.event.name(), position = %event.position(), "applied");
            }
            ApplyOutcome::Duplicate => {
                self.stats.duplicates += 1;
                debug!(auction_id, event = event.event.name(), position = %event.position(), "already applied");
            }
            ApplyOutcome::Stale => {
                self.stats.stale += 1;
                warn!(auction_id, tx = %event.meta.tx_hash, "bid on ended auction ignored");
            }
            ApplyOutcome::NotIncreasing => {
                self.stats.not_increasing += 1;
                warn!(auction_id, tx = %event.meta.tx_hash, "bid not above highest bid ignored");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AuctionCreated, AuctionEnded, BidPlaced, EventMeta};
    use crate::retry::RetryConfig;
    use crate::store::StoreCounts;
    use alloy_primitives::{Address, U256};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct State {
        auctions: HashMap<u64, AuctionRecord>,
        bids: HashMap<String, BidRecord>,
        dead: Vec<UnreconciledEvent>,
    }

    #[derive(Default)]
    struct FakeStore(Mutex<State>);

    #[async_trait]
    impl AuctionStore for FakeStore {
        async fn insert_auction(&self, r: &AuctionRecord) -> Result<ApplyOutcome, IndexerError> {
            let mut s = self.0.lock().unwrap();
            if s.auctions.contains_key(&r.auction_id) {
                return Ok(ApplyOutcome::Duplicate);
            }
            s.auctions.insert(r.auction_id, r.clone());
            Ok(ApplyOutcome::Applied)
        }
        async fn apply_bid(&self, b: &BidRecord, p: BidPolicy) -> Result<ApplyOutcome, IndexerError> {
            let mut s = self.0.lock().unwrap();
            if s.bids.contains_key(&b.tx_hash) {
                return Ok(ApplyOutcome::Duplicate);
            }
            let a = s
                .auctions
                .get_mut(&b.auction_id)
                .ok_or(IndexerError::ParentMissing { auction_id: b.auction_id })?;
            let out = a.apply_bid(b, p);
            if out.is_applied() {
                s.bids.insert(b.tx_hash.clone(), b.clone());
            }
            Ok(out)
        }
        async fn apply_settlement(&self, st: &Settlement) -> Result<ApplyOutcome, IndexerError> {
            let mut s = self.0.lock().unwrap();
            let a = s
                .auctions
                .get_mut(&st.auction_id)
                .ok_or(IndexerError::ParentMissing { auction_id: st.auction_id })?;
            Ok(a.apply_settlement(st))
        }
        async fn record_unreconciled(&self, e: &UnreconciledEvent) -> Result<(), IndexerError> {
            self.0.lock().unwrap().dead.push(e.clone());
            Ok(())
        }
        async fn auction(&self, id: u64) -> Result<Option<AuctionRecord>, IndexerError> {
            Ok(self.0.lock().unwrap().auctions.get(&id).cloned())
        }
        async fn bid(&self, tx: &str) -> Result<Option<BidRecord>, IndexerError> {
            Ok(self.0.lock().unwrap().bids.get(tx).cloned())
        }
        async fn bids_for_auction(&self, id: u64) -> Result<Vec<BidRecord>, IndexerError> {
            Ok(self.0.lock().unwrap().bids.values().filter(|b| b.auction_id == id).cloned().collect())
        }
        async fn unreconciled(&self) -> Result<Vec<UnreconciledEvent>, IndexerError> {
            Ok(self.0.lock().unwrap().dead.clone())
        }
        async fn last_applied_block(&self) -> Result<Option<u64>, IndexerError> {
            Ok(None)
        }
        async fn counts(&self) -> Result<StoreCounts, IndexerError> {
            Ok(StoreCounts::default())
        }
    }

    fn meta(tx: &str, block: u64, index: u32) -> EventMeta {
        EventMeta { tx_hash: tx.into(), block_number: block, log_index: index }
    }

    fn created(id: u64, block: u64) -> ChainEvent {
        ChainEvent::new(
            meta(&format!("0xc{id}"), block, 0),
            DomainEvent::AuctionCreated(AuctionCreated {
                auction_id: id,
                seller: Address::repeat_byte(0xaa),
                nft_contract: Address::repeat_byte(0xcc),
                token_id: U256::from(42u64),
                start_price: U256::from(1000u64),
                duration: 3600,
                start_time: 1000,
            }),
        )
    }

    fn bid(id: u64, tx: &str, amount: u64, block: u64) -> ChainEvent {
        ChainEvent::new(
            meta(tx, block, 1),
            DomainEvent::BidPlaced(BidPlaced {
                auction_id: id,
                bidder: Address::repeat_byte(0xbb),
                amount: U256::from(amount),
                token_address: Address::ZERO,
                timestamp: 1100,
            }),
        )
    }

    fn ended(id: u64, price: u64, block: u64) -> ChainEvent {
        ChainEvent::new(
            meta(&format!("0xe{id}"), block, 2),
            DomainEvent::AuctionEnded(AuctionEnded {
                auction_id: id,
                winner: Address::repeat_byte(0xbb),
                final_price: U256::from(price),
                token_address: Address::ZERO,
                timestamp: 4700,
            }),
        )
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            multiplier: 1.0,
        })
    }

    fn reconciler(store: Arc<FakeStore>, max_retries: u32) -> Reconciler {
        Reconciler::new(store, BidPolicy::TrustContract, fast_retry(max_retries))
    }

    #[tokio::test]
    async fn created_then_bid_then_duplicate_bid() {
        let store = Arc::new(FakeStore::default());
        let mut rec = reconciler(store.clone(), 3);

        assert_eq!(rec.apply(created(7, 10)).await.unwrap(), Reconciled::Outcome(ApplyOutcome::Applied));
        assert_eq!(rec.apply(bid(7, "0xb1", 1500, 11)).await.unwrap(), Reconciled::Outcome(ApplyOutcome::Applied));
        assert_eq!(rec.apply(bid(7, "0xb1", 1500, 11)).await.unwrap(), Reconciled::Outcome(ApplyOutcome::Duplicate));

        let a = store.auction(7).await.unwrap().unwrap();
        assert_eq!(a.bid_count, 1);
        assert_eq!(a.highest_bid, "1500");
        assert_eq!(a.highest_bidder, format!("0x{}", "bb".repeat(20)));
        assert_eq!(rec.stats().duplicates, 1);
    }

    #[tokio::test]
    async fn ended_before_created_is_applied_once_parent_exists() {
        let store = Arc::new(FakeStore::default());
        let mut rec = reconciler(store.clone(), 3);

        assert_eq!(rec.apply(ended(7, 1600, 20)).await.unwrap(), Reconciled::Deferred);
        assert_eq!(rec.pending_len(), 1);
        assert_eq!(rec.oldest_pending(), Some(LogPosition::new(20, 2)));

        rec.apply(created(7, 10)).await.unwrap();
        assert_eq!(rec.pending_len(), 0);
        assert!(rec.oldest_pending().is_none());

        let a = store.auction(7).await.unwrap().unwrap();
        assert!(a.ended);
        assert_eq!(a.highest_bid, "1600");
        assert_eq!(a.end_time, Some(4700));

        // redelivery of the settlement is a no-op
        assert_eq!(rec.apply(ended(7, 9999, 20)).await.unwrap(), Reconciled::Outcome(ApplyOutcome::Duplicate));
        assert_eq!(store.auction(7).await.unwrap().unwrap().highest_bid, "1600");
    }

    #[tokio::test]
    async fn later_events_queue_behind_pending_one() {
        let store = Arc::new(FakeStore::default());
        let mut rec = reconciler(store.clone(), 3);

        rec.apply(bid(7, "0xb1", 1500, 11)).await.unwrap();
        assert_eq!(rec.apply(ended(7, 1500, 12)).await.unwrap(), Reconciled::Deferred);
        assert_eq!(rec.pending_len(), 2);

        rec.apply(created(7, 10)).await.unwrap();
        assert_eq!(rec.pending_len(), 0);

        // bid applied before the settlement, so it counts
        let a = store.auction(7).await.unwrap().unwrap();
        assert!(a.ended);
        assert_eq!(a.bid_count, 1);
        assert!(store.bid("0xb1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn redelivered_pending_event_is_not_queued_twice() {
        let store = Arc::new(FakeStore::default());
        let mut rec = reconciler(store, 3);

        rec.apply(bid(7, "0xb1", 1500, 11)).await.unwrap();
        rec.apply(bid(7, "0xb1", 1500, 11)).await.unwrap();
        assert_eq!(rec.pending_len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_are_dead_lettered() {
        let store = Arc::new(FakeStore::default());
        let mut rec = reconciler(store.clone(), 2);

        rec.apply(bid(9, "0xB9", 500, 30)).await.unwrap();
        rec.flush_pending(&CancellationToken::new()).await.unwrap();

        assert_eq!(rec.pending_len(), 0);
        let dead = store.unreconciled().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].tx_hash, "0xb9");
        assert_eq!(dead[0].kind, "BidPlaced");
        assert_eq!(dead[0].attempts, 3);
        assert_eq!(rec.stats().unreconciled, 1);
    }

    #[tokio::test]
    async fn zero_retries_dead_letters_immediately() {
        let store = Arc::new(FakeStore::default());
        let mut rec = reconciler(store.clone(), 0);

        assert_eq!(rec.apply(ended(3, 1, 5)).await.unwrap(), Reconciled::Deferred);
        assert_eq!(rec.pending_len(), 0);
        assert_eq!(store.unreconciled().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn flush_returns_on_cancel() {
        let store = Arc::new(FakeStore::default());
        let mut rec = Reconciler::new(
            store,
            BidPolicy::TrustContract,
            RetryPolicy::new(RetryConfig {
                max_retries: 3,
                initial_backoff_ms: 60_000,
                max_backoff_ms: 60_000,
                multiplier: 1.0,
            }),
        );
        rec.apply(bid(7, "0xb1", 1500, 11)).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        rec.flush_pending(&cancel).await.unwrap();
        assert_eq!(rec.pending_len(), 1);
    }

    #[tokio::test]
    async fn unknown_events_are_ignored() {
        let store = Arc::new(FakeStore::default());
        let mut rec = reconciler(store, 3);
        let ev = ChainEvent::new(meta("0xf", 1, 0), DomainEvent::Unknown { topic0: None });
        assert_eq!(rec.apply(ev).await.unwrap(), Reconciled::Ignored);
        assert_eq!(rec.stats().unknown, 1);
    }
}
