//! Auction event decoder: raw log → [`DomainEvent`].
//!
//! Indexed parameters come from topics 1.. in declaration order; the rest
//! are 32-byte big-endian words of the data payload. Trailing data beyond
//! the declared words is ignored.

use alloy_primitives::{Address, B256, U256};
use thiserror::Error;

use auctionindex_core::error::IndexerError;
use auctionindex_core::events::{AuctionCreated, AuctionEnded, BidPlaced, DomainEvent};

use crate::fetcher::RawLog;
use crate::fingerprint::AuctionTopics;

const WORD: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{event}: expected {expected} topics, got {got}")]
    TopicCount {
        event: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{event}: data too short: need {expected} bytes, got {got}")]
    DataTooShort {
        event: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{event}.{field}: address word has non-zero high bytes")]
    AddressPadding {
        event: &'static str,
        field: &'static str,
    },

    #[error("{event}.{field}: value does not fit in u64")]
    Overflow {
        event: &'static str,
        field: &'static str,
    },

    #[error("malformed log: {0}")]
    Malformed(String),
}

impl From<DecodeError> for IndexerError {
    fn from(e: DecodeError) -> Self {
        IndexerError::Decode(e.to_string())
    }
}

/// Decodes the auction contract's three events.
#[derive(Debug, Clone)]
pub struct AuctionEventDecoder {
    topics: AuctionTopics,
}

impl Default for AuctionEventDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AuctionEventDecoder {
    pub fn new() -> Self {
        Self {
            topics: AuctionTopics::compute(),
        }
    }

    pub fn topics(&self) -> &AuctionTopics {
        &self.topics
    }

    /// Decode one log. An unrecognised (or missing) topic 0 is
    /// `DomainEvent::Unknown`, not an error. A log whose hex payload could
    /// not be parsed is.
    pub fn decode(&self, log: &RawLog) -> Result<DomainEvent, DecodeError> {
        if let Some(reason) = &log.malformed {
            return Err(DecodeError::Malformed(reason.clone()));
        }
        let Some(topic0) = log.topics.first().copied() else {
            return Ok(DomainEvent::Unknown { topic0: None });
        };

        if topic0 == self.topics.auction_created {
            let ev = "AuctionCreated";
            let r = Reader::new(ev, log, 4, 4)?;
            Ok(DomainEvent::AuctionCreated(AuctionCreated {
                auction_id: u64_of(ev, "auctionId", r.topic_uint(1))?,
                seller: r.topic_address(2, "seller")?,
                nft_contract: r.topic_address(3, "nftContract")?,
                token_id: r.word_uint(0),
                start_price: r.word_uint(1),
                duration: u64_of(ev, "duration", r.word_uint(2))?,
                start_time: u64_of(ev, "startTime", r.word_uint(3))?,
            }))
        } else if topic0 == self.topics.bid_placed {
            let ev = "BidPlaced";
            let r = Reader::new(ev, log, 3, 3)?;
            Ok(DomainEvent::BidPlaced(BidPlaced {
                auction_id: u64_of(ev, "auctionId", r.topic_uint(1))?,
                bidder: r.topic_address(2, "bidder")?,
                amount: r.word_uint(0),
                token_address: r.word_address(1, "tokenAddress")?,
                timestamp: u64_of(ev, "timestamp", r.word_uint(2))?,
            }))
        } else if topic0 == self.topics.auction_ended {
            let ev = "AuctionEnded";
            let r = Reader::new(ev, log, 3, 3)?;
            Ok(DomainEvent::AuctionEnded(AuctionEnded {
                auction_id: u64_of(ev, "auctionId", r.topic_uint(1))?,
                winner: r.topic_address(2, "winner")?,
                final_price: r.word_uint(0),
                token_address: r.word_address(1, "tokenAddress")?,
                timestamp: u64_of(ev, "timestamp", r.word_uint(2))?,
            }))
        } else {
            Ok(DomainEvent::Unknown {
                topic0: Some(topic0),
            })
        }
    }
}

/// Bounds-checked view over one log's topics and data words.
struct Reader<'a> {
    event: &'static str,
    topics: &'a [B256],
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(
        event: &'static str,
        log: &'a RawLog,
        topic_count: usize,
        words: usize,
    ) -> Result<Self, DecodeError> {
        if log.topics.len() != topic_count {
            return Err(DecodeError::TopicCount {
                event,
                expected: topic_count,
                got: log.topics.len(),
            });
        }
        if log.data.len() < words * WORD {
            return Err(DecodeError::DataTooShort {
                event,
                expected: words * WORD,
                got: log.data.len(),
            });
        }
        Ok(Self {
            event,
            topics: &log.topics,
            data: &log.data,
        })
    }

    fn word(&self, i: usize) -> &[u8] {
        &self.data[i * WORD..(i + 1) * WORD]
    }

    fn topic_uint(&self, i: usize) -> U256 {
        U256::from_be_slice(self.topics[i].as_slice())
    }

    fn word_uint(&self, i: usize) -> U256 {
        U256::from_be_slice(self.word(i))
    }

    fn topic_address(&self, i: usize, field: &'static str) -> Result<Address, DecodeError> {
        address_of(self.event, field, self.topics[i].as_slice())
    }

    fn word_address(&self, i: usize, field: &'static str) -> Result<Address, DecodeError> {
        address_of(self.event, field, self.word(i))
    }
}

fn address_of(event: &'static str, field: &'static str, word: &[u8]) -> Result<Address, DecodeError> {
    if word[..12].iter().any(|b| *b != 0) {
        return Err(DecodeError::AddressPadding { event, field });
    }
    Ok(Address::from_slice(&word[12..]))
}

fn u64_of(event: &'static str, field: &'static str, v: U256) -> Result<u64, DecodeError> {
    if v.bit_len() > 64 {
        return Err(DecodeError::Overflow { event, field });
    }
    Ok(v.as_limbs()[0])
}
