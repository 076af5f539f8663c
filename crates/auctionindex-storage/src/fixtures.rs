//! Shared records for backend tests.

use auctionindex_core::types::{AuctionRecord, BidRecord, Settlement, UnreconciledEvent, ZERO_ADDRESS};

pub fn auction(id: u64, block: u64) -> AuctionRecord {
    AuctionRecord {
        auction_id: id,
        seller: "0xaa".into(),
        nft_contract: "0xcc".into(),
        token_id: "42".into(),
        start_price: "1000".into(),
        duration: 3600,
        start_time: 1000,
        ended: false,
        end_time: None,
        highest_bidder: ZERO_ADDRESS.into(),
        highest_bid: "0".into(),
        token_address: ZERO_ADDRESS.into(),
        bid_count: 0,
        created_block: block,
        updated_block: block,
    }
}

pub fn bid(auction_id: u64, tx: &str, amount: &str, block: u64, log_index: u32) -> BidRecord {
    BidRecord {
        tx_hash: tx.into(),
        auction_id,
        bidder: "0xbb".into(),
        amount: amount.into(),
        token_address: ZERO_ADDRESS.into(),
        block_number: block,
        log_index,
        timestamp: 1100,
    }
}

pub fn settlement(auction_id: u64, price: &str, block: u64) -> Settlement {
    Settlement {
        auction_id,
        winner: "0xbb".into(),
        final_price: price.into(),
        token_address: ZERO_ADDRESS.into(),
        end_time: 4700,
        block_number: block,
    }
}

pub fn dead_letter(tx: &str, log_index: u32) -> UnreconciledEvent {
    UnreconciledEvent {
        tx_hash: tx.into(),
        log_index,
        block_number: 30,
        auction_id: 9,
        kind: "BidPlaced".into(),
        attempts: 6,
        reason: "auction 9 not found".into(),
        recorded_at: 1_700_000_000,
    }
}
