//! Typed domain events decoded from the auction contract's logs.

use alloy_primitives::{Address, B256, U256};

use crate::types::LogPosition;

/// `AuctionCreated(uint256 indexed auctionId, address indexed seller,
/// address indexed nftContract, uint256 tokenId, uint256 startPrice,
/// uint256 duration, uint256 startTime)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionCreated {
    pub auction_id: u64,
    pub seller: Address,
    pub nft_contract: Address,
    pub token_id: U256,
    pub start_price: U256,
    /// Seconds.
    pub duration: u64,
    /// Unix seconds.
    pub start_time: u64,
}

/// `BidPlaced(uint256 indexed auctionId, address indexed bidder,
/// uint256 amount, address tokenAddress, uint256 timestamp)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidPlaced {
    pub auction_id: u64,
    pub bidder: Address,
    pub amount: U256,
    /// Zero address = native currency.
    pub token_address: Address,
    pub timestamp: u64,
}

/// `AuctionEnded(uint256 indexed auctionId, address indexed winner,
/// uint256 finalPrice, address tokenAddress, uint256 timestamp)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionEnded {
    pub auction_id: u64,
    pub winner: Address,
    pub final_price: U256,
    pub token_address: Address,
    pub timestamp: u64,
}

/// A decoded contract event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    AuctionCreated(AuctionCreated),
    BidPlaced(BidPlaced),
    AuctionEnded(AuctionEnded),
    /// topic 0 matched none of the known signatures (or the log had no topics).
    Unknown { topic0: Option<B256> },
}

impl DomainEvent {
    /// The auction this event belongs to, if it is a known event.
    pub fn auction_id(&self) -> Option<u64> {
        match self {
            Self::AuctionCreated(e) => Some(e.auction_id),
            Self::BidPlaced(e) => Some(e.auction_id),
            Self::AuctionEnded(e) => Some(e.auction_id),
            Self::Unknown { .. } => None,
        }
    }

    /// Short event name for logs and dead-letter records.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AuctionCreated(_) => "AuctionCreated",
            Self::BidPlaced(_) => "BidPlaced",
            Self::AuctionEnded(_) => "AuctionEnded",
            Self::Unknown { .. } => "Unknown",
        }
    }
}

/// Where an event came from on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMeta {
    pub tx_hash: String,
    pub block_number: u64,
    pub log_index: u32,
}

impl EventMeta {
    pub fn position(&self) -> LogPosition {
        LogPosition::new(self.block_number, self.log_index)
    }
}

/// A domain event together with its chain location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEvent {
    pub meta: EventMeta,
    pub event: DomainEvent,
}

impl ChainEvent {
    pub fn new(meta: EventMeta, event: DomainEvent) -> Self {
        Self { meta, event }
    }

    pub fn position(&self) -> LogPosition {
        self.meta.position()
    }
}

/// Lower-cased `0x`-prefixed hex form of an address, as stored.
pub fn address_to_string(addr: &Address) -> String {
    format!("0x{}", hex::encode(addr.as_slice()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_lower_cased() {
        let addr: Address = "0xD8dA6BF26964aF9D7eEd9e03E53415D37aA96045".parse().unwrap();
        assert_eq!(
            address_to_string(&addr),
            "0xd8da6bf26964af9d7eed9e03e53415d37aa96045"
        );
        assert_eq!(
            address_to_string(&Address::ZERO),
            "0x0000000000000000000000000000000000000000"
        );
    }

    #[test]
    fn auction_id_and_name() {
        let ev = DomainEvent::BidPlaced(BidPlaced {
            auction_id: 7,
            bidder: Address::ZERO,
            amount: U256::from(1500u64),
            token_address: Address::ZERO,
            timestamp: 1100,
        });
        assert_eq!(ev.auction_id(), Some(7));
        assert_eq!(ev.name(), "BidPlaced");

        let unknown = DomainEvent::Unknown { topic0: None };
        assert_eq!(unknown.auction_id(), None);
        assert_eq!(unknown.name(), "Unknown");
    }
}
