//! Event fingerprints for the auction contract.
//!
//! The fingerprint of an EVM event is the keccak256 hash of its canonical
//! signature string; it arrives as topic 0 of every log the event emits.

use alloy_primitives::B256;
use tiny_keccak::{Hasher, Keccak};

pub const AUCTION_CREATED_SIGNATURE: &str =
    "AuctionCreated(uint256,address,address,uint256,uint256,uint256,uint256)";
pub const BID_PLACED_SIGNATURE: &str = "BidPlaced(uint256,address,uint256,address,uint256)";
pub const AUCTION_ENDED_SIGNATURE: &str = "AuctionEnded(uint256,address,uint256,address,uint256)";

/// Compute the keccak256 fingerprint of an event signature string.
pub fn keccak256_signature(signature: &str) -> B256 {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(signature.as_bytes());
    hasher.finalize(&mut output);
    B256::from(output)
}

/// Topic-0 values of the three auction events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuctionTopics {
    pub auction_created: B256,
    pub bid_placed: B256,
    pub auction_ended: B256,
}

impl AuctionTopics {
    pub fn compute() -> Self {
        Self {
            auction_created: keccak256_signature(AUCTION_CREATED_SIGNATURE),
            bid_placed: keccak256_signature(BID_PLACED_SIGNATURE),
            auction_ended: keccak256_signature(AUCTION_ENDED_SIGNATURE),
        }
    }

    /// `0x`-prefixed hex form, for `eth_getLogs` / `eth_subscribe` filters.
    pub fn as_hex(&self) -> Vec<String> {
        [self.auction_created, self.bid_placed, self.auction_ended]
            .iter()
            .map(|t| format!("0x{}", hex::encode(t.as_slice())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex_of(b: B256) -> String {
        format!("0x{}", hex::encode(b.as_slice()))
    }

    #[test]
    fn erc20_transfer_fingerprint() {
        assert_eq!(
            hex_of(keccak256_signature("Transfer(address,address,uint256)")),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn auction_fingerprints() {
        let topics = AuctionTopics::compute();
        assert_eq!(
            hex_of(topics.auction_created),
            "0xcaf0ae751fb2b122e8718bf7c0d4b7584d1418a853a4d0cdaba45418d3da138b"
        );
        assert_eq!(
            hex_of(topics.bid_placed),
            "0x2e296671c28b83e813c76e2acf7481f5a2cc46aaeb9bcf33b3e048f50e9c33e9"
        );
        assert_eq!(
            hex_of(topics.auction_ended),
            "0xe5475ecf90fac88802f904d6cb8390f7106dec2526f70b078ce579d6f7221251"
        );
        assert_eq!(topics.as_hex().len(), 3);
    }
}
