//! Persisted records and the per-auction state transitions applied to them.

use std::fmt;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::events::{address_to_string, AuctionCreated, AuctionEnded, BidPlaced, EventMeta};

/// The zero address; stands for "native currency" / "no bidder yet".
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

// ─── LogPosition ─────────────────────────────────────────────────────────────

/// Location of a log in chain order: block number, then log index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogPosition {
    pub block_number: u64,
    pub log_index: u32,
}

impl LogPosition {
    pub fn new(block_number: u64, log_index: u32) -> Self {
        Self { block_number, log_index }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.block_number, self.log_index)
    }
}

// ─── LogFilter ───────────────────────────────────────────────────────────────

/// Filter for which logs the chain source should deliver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogFilter {
    /// Only deliver logs from these contract addresses (empty = all addresses).
    pub addresses: Vec<String>,
    /// Only deliver logs with this topic[0] value (empty = all events).
    pub topic0_values: Vec<String>,
}

impl LogFilter {
    /// Create a filter for a single contract address.
    pub fn address(addr: impl Into<String>) -> Self {
        Self {
            addresses: vec![addr.into()],
            ..Default::default()
        }
    }

    /// Add a topic0 filter (event signature hash).
    pub fn topic0(mut self, topic: impl Into<String>) -> Self {
        self.topic0_values.push(topic.into());
        self
    }

    /// Returns `true` if `address` matches this filter.
    pub fn matches_address(&self, address: &str) -> bool {
        self.addresses.is_empty()
            || self.addresses.iter().any(|a| a.eq_ignore_ascii_case(address))
    }
}

// ─── BidPolicy / ApplyOutcome ────────────────────────────────────────────────

/// How a `BidPlaced` event updates the auction aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidPolicy {
    /// Every non-stale bid overwrites the highest bid. The contract only
    /// emits bids above the previous highest.
    #[default]
    TrustContract,
    /// Ignore bids whose amount is not strictly above the current highest.
    RequireIncreasing,
}

/// Result of applying one event to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// State changed.
    Applied,
    /// Already applied earlier (same auction id / tx hash); nothing changed.
    Duplicate,
    /// Bid for an auction that has already ended; nothing changed.
    Stale,
    /// Bid not above the current highest under `BidPolicy::RequireIncreasing`.
    NotIncreasing,
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied => write!(f, "applied"),
            Self::Duplicate => write!(f, "duplicate"),
            Self::Stale => write!(f, "stale"),
            Self::NotIncreasing => write!(f, "not-increasing"),
        }
    }
}

// ─── AuctionRecord ───────────────────────────────────────────────────────────

/// Current state of one on-chain auction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionRecord {
    pub auction_id: u64,
    pub seller: String,
    pub nft_contract: String,
    /// Decimal string (uint256).
    pub token_id: String,
    /// Decimal string (uint256).
    pub start_price: String,
    pub duration: u64,
    pub start_time: u64,
    pub ended: bool,
    pub end_time: Option<u64>,
    pub highest_bidder: String,
    /// Decimal string (uint256), `"0"` before the first bid.
    pub highest_bid: String,
    pub token_address: String,
    pub bid_count: u64,
    /// Block of the `AuctionCreated` log.
    pub created_block: u64,
    /// Block of the latest log applied to this record.
    pub updated_block: u64,
}

impl AuctionRecord {
    /// A fresh, not-yet-bid-on record for a creation event.
    pub fn from_created(ev: &AuctionCreated, meta: &EventMeta) -> Self {
        Self {
            auction_id: ev.auction_id,
            seller: address_to_string(&ev.seller),
            nft_contract: address_to_string(&ev.nft_contract),
            token_id: ev.token_id.to_string(),
            start_price: ev.start_price.to_string(),
            duration: ev.duration,
            start_time: ev.start_time,
            ended: false,
            end_time: None,
            highest_bidder: ZERO_ADDRESS.to_string(),
            highest_bid: "0".to_string(),
            token_address: ZERO_ADDRESS.to_string(),
            bid_count: 0,
            created_block: meta.block_number,
            updated_block: meta.block_number,
        }
    }

    /// Fold a new (not previously applied) bid into the aggregate.
    ///
    /// The caller persists `bid` only when this returns `Applied`.
    pub fn apply_bid(&mut self, bid: &BidRecord, policy: BidPolicy) -> ApplyOutcome {
        if self.ended {
            return ApplyOutcome::Stale;
        }
        if policy == BidPolicy::RequireIncreasing
            && self.bid_count > 0
            && !amount_gt(&bid.amount, &self.highest_bid)
        {
            return ApplyOutcome::NotIncreasing;
        }
        self.highest_bidder = bid.bidder.clone();
        self.highest_bid = bid.amount.clone();
        self.token_address = bid.token_address.clone();
        self.bid_count += 1;
        self.updated_block = self.updated_block.max(bid.block_number);
        ApplyOutcome::Applied
    }

    /// Apply the contract's final tally. Terminal; a second call is a no-op.
    pub fn apply_settlement(&mut self, s: &Settlement) -> ApplyOutcome {
        if self.ended {
            return ApplyOutcome::Duplicate;
        }
        self.ended = true;
        self.end_time = Some(s.end_time);
        self.highest_bidder = s.winner.clone();
        self.highest_bid = s.final_price.clone();
        self.token_address = s.token_address.clone();
        self.updated_block = self.updated_block.max(s.block_number);
        ApplyOutcome::Applied
    }
}

// ─── BidRecord ───────────────────────────────────────────────────────────────

/// One accepted bid. Immutable once stored; unique by `tx_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidRecord {
    pub tx_hash: String,
    pub auction_id: u64,
    pub bidder: String,
    /// Decimal string (uint256).
    pub amount: String,
    pub token_address: String,
    pub block_number: u64,
    pub log_index: u32,
    pub timestamp: u64,
}

impl BidRecord {
    pub fn from_event(ev: &BidPlaced, meta: &EventMeta) -> Self {
        Self {
            tx_hash: meta.tx_hash.to_lowercase(),
            auction_id: ev.auction_id,
            bidder: address_to_string(&ev.bidder),
            amount: ev.amount.to_string(),
            token_address: address_to_string(&ev.token_address),
            block_number: meta.block_number,
            log_index: meta.log_index,
            timestamp: ev.timestamp,
        }
    }
}

// ─── Settlement ──────────────────────────────────────────────────────────────

/// The final tally carried by `AuctionEnded`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub auction_id: u64,
    pub winner: String,
    pub final_price: String,
    pub token_address: String,
    pub end_time: u64,
    pub block_number: u64,
}

impl Settlement {
    pub fn from_event(ev: &AuctionEnded, meta: &EventMeta) -> Self {
        Self {
            auction_id: ev.auction_id,
            winner: address_to_string(&ev.winner),
            final_price: ev.final_price.to_string(),
            token_address: address_to_string(&ev.token_address),
            end_time: ev.timestamp,
            block_number: meta.block_number,
        }
    }
}

// ─── UnreconciledEvent ───────────────────────────────────────────────────────

/// An event the reconciler gave up on (dead letter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreconciledEvent {
    pub tx_hash: String,
    pub log_index: u32,
    pub block_number: u64,
    pub auction_id: u64,
    /// Event name, e.g. `"BidPlaced"`.
    pub kind: String,
    pub attempts: u32,
    pub reason: String,
    /// Unix seconds.
    pub recorded_at: i64,
}

/// `a > b` for decimal uint256 strings. Unparseable input compares as greater.
fn amount_gt(a: &str, b: &str) -> bool {
    match (U256::from_str_radix(a, 10), U256::from_str_radix(b, 10)) {
        (Ok(a), Ok(b)) => a > b,
        _ => true,
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
