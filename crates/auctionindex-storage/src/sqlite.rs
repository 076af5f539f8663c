//! SQLite storage backend for AuctionIndex.
//!
//! Persists auctions, bids, dead letters and checkpoints to a single SQLite
//! file. Every event is applied in one `sqlx` transaction; WAL mode lets
//! readers proceed while the listener writes.
//!
//! # Usage
//! ```rust,no_run
//! use auctionindex_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./auctions.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use auctionindex_core::checkpoint::{Checkpoint, CheckpointStore};
use auctionindex_core::error::IndexerError;
use auctionindex_core::store::{AuctionStore, StoreCounts};
use auctionindex_core::types::{
    ApplyOutcome, AuctionRecord, BidPolicy, BidRecord, Settlement, UnreconciledEvent,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS auctions (
        auction_id     INTEGER PRIMARY KEY,
        seller         TEXT    NOT NULL,
        nft_contract   TEXT    NOT NULL,
        token_id       TEXT    NOT NULL,
        start_price    TEXT    NOT NULL,
        duration       INTEGER NOT NULL,
        start_time     INTEGER NOT NULL,
        ended          INTEGER NOT NULL DEFAULT 0,
        end_time       INTEGER,
        highest_bidder TEXT    NOT NULL,
        highest_bid    TEXT    NOT NULL,
        token_address  TEXT    NOT NULL,
        bid_count      INTEGER NOT NULL DEFAULT 0,
        created_block  INTEGER NOT NULL,
        updated_block  INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS bids (
        tx_hash       TEXT    PRIMARY KEY,
        auction_id    INTEGER NOT NULL REFERENCES auctions (auction_id),
        bidder        TEXT    NOT NULL,
        amount        TEXT    NOT NULL,
        token_address TEXT    NOT NULL,
        block_number  INTEGER NOT NULL,
        log_index     INTEGER NOT NULL,
        timestamp     INTEGER NOT NULL
    );",
    "CREATE INDEX IF NOT EXISTS idx_bids_auction
        ON bids (auction_id, block_number DESC, log_index DESC);",
    "CREATE TABLE IF NOT EXISTS unreconciled_events (
        tx_hash      TEXT    NOT NULL,
        log_index    INTEGER NOT NULL,
        block_number INTEGER NOT NULL,
        auction_id   INTEGER NOT NULL,
        kind         TEXT    NOT NULL,
        attempts     INTEGER NOT NULL,
        reason       TEXT    NOT NULL,
        recorded_at  INTEGER NOT NULL,
        PRIMARY KEY (tx_hash, log_index)
    );",
    "CREATE TABLE IF NOT EXISTS checkpoints (
        chain_id     TEXT    NOT NULL,
        indexer_id   TEXT    NOT NULL,
        block_number INTEGER NOT NULL,
        log_index    INTEGER NOT NULL,
        updated_at   INTEGER NOT NULL,
        PRIMARY KEY (chain_id, indexer_id)
    );",
];

const AUCTION_COLUMNS: &str = "auction_id, seller, nft_contract, token_id, start_price, duration,
    start_time, ended, end_time, highest_bidder, highest_bid, token_address, bid_count,
    created_block, updated_block";

const BID_COLUMNS: &str =
    "tx_hash, auction_id, bidder, amount, token_address, block_number, log_index, timestamp";

fn storage(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// SQLite-backed storage for auctions, bids and checkpoints.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./auctions.db"`) or a full
    /// SQLite URL (`"sqlite:./auctions.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Backed by a single pooled connection (each connection would otherwise
    /// get its own empty database). All data is lost when the pool is dropped.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await.map_err(storage)?;
        }
        Ok(())
    }
}

// ─── Row mapping ─────────────────────────────────────────────────────────────

fn auction_from_row(r: &SqliteRow) -> Result<AuctionRecord, sqlx::Error> {
    Ok(AuctionRecord {
        auction_id: r.try_get::<i64, _>("auction_id")? as u64,
        seller: r.try_get("seller")?,
        nft_contract: r.try_get("nft_contract")?,
        token_id: r.try_get("token_id")?,
        start_price: r.try_get("start_price")?,
        duration: r.try_get::<i64, _>("duration")? as u64,
        start_time: r.try_get::<i64, _>("start_time")? as u64,
        ended: r.try_get("ended")?,
        end_time: r.try_get::<Option<i64>, _>("end_time")?.map(|t| t as u64),
        highest_bidder: r.try_get("highest_bidder")?,
        highest_bid: r.try_get("highest_bid")?,
        token_address: r.try_get("token_address")?,
        bid_count: r.try_get::<i64, _>("bid_count")? as u64,
        created_block: r.try_get::<i64, _>("created_block")? as u64,
        updated_block: r.try_get::<i64, _>("updated_block")? as u64,
    })
}

fn bid_from_row(r: &SqliteRow) -> Result<BidRecord, sqlx::Error> {
    Ok(BidRecord {
        tx_hash: r.try_get("tx_hash")?,
        auction_id: r.try_get::<i64, _>("auction_id")? as u64,
        bidder: r.try_get("bidder")?,
        amount: r.try_get("amount")?,
        token_address: r.try_get("token_address")?,
        block_number: r.try_get::<i64, _>("block_number")? as u64,
        log_index: r.try_get::<i64, _>("log_index")? as u32,
        timestamp: r.try_get::<i64, _>("timestamp")? as u64,
    })
}

fn unreconciled_from_row(r: &SqliteRow) -> Result<UnreconciledEvent, sqlx::Error> {
    Ok(UnreconciledEvent {
        tx_hash: r.try_get("tx_hash")?,
        log_index: r.try_get::<i64, _>("log_index")? as u32,
        block_number: r.try_get::<i64, _>("block_number")? as u64,
        auction_id: r.try_get::<i64, _>("auction_id")? as u64,
        kind: r.try_get("kind")?,
        attempts: r.try_get::<i64, _>("attempts")? as u32,
        reason: r.try_get("reason")?,
        recorded_at: r.try_get("recorded_at")?,
    })
}

// ─── AuctionStore impl ───────────────────────────────────────────────────────

#[async_trait]
impl AuctionStore for SqliteStorage {
    async fn insert_auction(&self, a: &AuctionRecord) -> Result<ApplyOutcome, IndexerError> {
        let result = sqlx::query(&format!(
            "INSERT OR IGNORE INTO auctions ({AUCTION_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(a.auction_id as i64)
        .bind(&a.seller)
        .bind(&a.nft_contract)
        .bind(&a.token_id)
        .bind(&a.start_price)
        .bind(a.duration as i64)
        .bind(a.start_time as i64)
        .bind(a.ended)
        .bind(a.end_time.map(|t| t as i64))
        .bind(&a.highest_bidder)
        .bind(&a.highest_bid)
        .bind(&a.token_address)
        .bind(a.bid_count as i64)
        .bind(a.created_block as i64)
        .bind(a.updated_block as i64)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Ok(ApplyOutcome::Duplicate);
        }
        debug!(auction_id = a.auction_id, block = a.created_block, "auction stored");
        Ok(ApplyOutcome::Applied)
    }

    async fn apply_bid(
        &self,
        bid: &BidRecord,
        policy: BidPolicy,
    ) -> Result<ApplyOutcome, IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let known = sqlx::query("SELECT 1 FROM bids WHERE tx_hash = ?")
            .bind(&bid.tx_hash)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?;
        if known.is_some() {
            return Ok(ApplyOutcome::Duplicate);
        }

        let row = sqlx::query(&format!(
            "SELECT {AUCTION_COLUMNS} FROM auctions WHERE auction_id = ?"
        ))
        .bind(bid.auction_id as i64)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage)?;
        let Some(row) = row else {
            return Err(IndexerError::ParentMissing {
                auction_id: bid.auction_id,
            });
        };
        let mut auction = auction_from_row(&row).map_err(storage)?;

        let outcome = auction.apply_bid(bid, policy);
        if !outcome.is_applied() {
            return Ok(outcome);
        }

        sqlx::query(&format!(
            "INSERT INTO bids ({BID_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&bid.tx_hash)
        .bind(bid.auction_id as i64)
        .bind(&bid.bidder)
        .bind(&bid.amount)
        .bind(&bid.token_address)
        .bind(bid.block_number as i64)
        .bind(bid.log_index as i64)
        .bind(bid.timestamp as i64)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        sqlx::query(
            "UPDATE auctions
             SET highest_bidder = ?, highest_bid = ?, token_address = ?,
                 bid_count = ?, updated_block = ?
             WHERE auction_id = ?",
        )
        .bind(&auction.highest_bidder)
        .bind(&auction.highest_bid)
        .bind(&auction.token_address)
        .bind(auction.bid_count as i64)
        .bind(auction.updated_block as i64)
        .bind(auction.auction_id as i64)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        debug!(auction_id = bid.auction_id, tx = %bid.tx_hash, "bid stored");
        Ok(outcome)
    }

    async fn apply_settlement(&self, s: &Settlement) -> Result<ApplyOutcome, IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let row = sqlx::query(&format!(
            "SELECT {AUCTION_COLUMNS} FROM auctions WHERE auction_id = ?"
        ))
        .bind(s.auction_id as i64)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage)?;
        let Some(row) = row else {
            return Err(IndexerError::ParentMissing {
                auction_id: s.auction_id,
            });
        };
        let mut auction = auction_from_row(&row).map_err(storage)?;

        let outcome = auction.apply_settlement(s);
        if !outcome.is_applied() {
            return Ok(outcome);
        }

        sqlx::query(
            "UPDATE auctions
             SET ended = ?, end_time = ?, highest_bidder = ?, highest_bid = ?,
                 token_address = ?, updated_block = ?
             WHERE auction_id = ?",
        )
        .bind(auction.ended)
        .bind(auction.end_time.map(|t| t as i64))
        .bind(&auction.highest_bidder)
        .bind(&auction.highest_bid)
        .bind(&auction.token_address)
        .bind(auction.updated_block as i64)
        .bind(auction.auction_id as i64)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        debug!(auction_id = s.auction_id, "settlement stored");
        Ok(outcome)
    }

    async fn record_unreconciled(&self, e: &UnreconciledEvent) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT OR IGNORE INTO unreconciled_events
             (tx_hash, log_index, block_number, auction_id, kind, attempts, reason, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&e.tx_hash)
        .bind(e.log_index as i64)
        .bind(e.block_number as i64)
        .bind(e.auction_id as i64)
        .bind(&e.kind)
        .bind(e.attempts as i64)
        .bind(&e.reason)
        .bind(e.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn auction(&self, auction_id: u64) -> Result<Option<AuctionRecord>, IndexerError> {
        let row = sqlx::query(&format!(
            "SELECT {AUCTION_COLUMNS} FROM auctions WHERE auction_id = ?"
        ))
        .bind(auction_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.as_ref()
            .map(auction_from_row)
            .transpose()
            .map_err(storage)
    }

    async fn bid(&self, tx_hash: &str) -> Result<Option<BidRecord>, IndexerError> {
        let row = sqlx::query(&format!("SELECT {BID_COLUMNS} FROM bids WHERE tx_hash = ?"))
            .bind(tx_hash.to_lowercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.as_ref().map(bid_from_row).transpose().map_err(storage)
    }

    async fn bids_for_auction(&self, auction_id: u64) -> Result<Vec<BidRecord>, IndexerError> {
        let rows = sqlx::query(&format!(
            "SELECT {BID_COLUMNS} FROM bids WHERE auction_id = ?
             ORDER BY block_number DESC, log_index DESC"
        ))
        .bind(auction_id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter()
            .map(bid_from_row)
            .collect::<Result<_, _>>()
            .map_err(storage)
    }

    async fn unreconciled(&self) -> Result<Vec<UnreconciledEvent>, IndexerError> {
        let rows = sqlx::query(
            "SELECT tx_hash, log_index, block_number, auction_id, kind, attempts, reason, recorded_at
             FROM unreconciled_events ORDER BY block_number, log_index",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter()
            .map(unreconciled_from_row)
            .collect::<Result<_, _>>()
            .map_err(storage)
    }

    async fn last_applied_block(&self) -> Result<Option<u64>, IndexerError> {
        let row = sqlx::query("SELECT MAX(updated_block) AS block FROM auctions")
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        let block: Option<i64> = row.try_get("block").map_err(storage)?;
        Ok(block.map(|b| b as u64))
    }

    async fn counts(&self) -> Result<StoreCounts, IndexerError> {
        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM auctions)                AS auctions,
                (SELECT COUNT(*) FROM auctions WHERE ended = 1) AS ended,
                (SELECT COUNT(*) FROM bids)                    AS bids,
                (SELECT COUNT(*) FROM unreconciled_events)     AS unreconciled",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;

        let count = |col: &str| -> Result<u64, IndexerError> {
            Ok(row.try_get::<i64, _>(col).map_err(storage)? as u64)
        };
        Ok(StoreCounts {
            auctions: count("auctions")?,
            ended_auctions: count("ended")?,
            bids: count("bids")?,
            unreconciled: count("unreconciled")?,
        })
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn load(
        &self,
        chain_id: &str,
        indexer_id: &str,
    ) -> Result<Option<Checkpoint>, IndexerError> {
        let row = sqlx::query(
            "SELECT chain_id, indexer_id, block_number, log_index, updated_at
             FROM checkpoints WHERE chain_id = ? AND indexer_id = ?",
        )
        .bind(chain_id)
        .bind(indexer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        let Some(r) = row else {
            return Ok(None);
        };
        let cp = (|| -> Result<Checkpoint, sqlx::Error> {
            Ok(Checkpoint {
                chain_id: r.try_get("chain_id")?,
                indexer_id: r.try_get("indexer_id")?,
                block_number: r.try_get::<i64, _>("block_number")? as u64,
                log_index: r.try_get::<i64, _>("log_index")? as u32,
                updated_at: r.try_get("updated_at")?,
            })
        })()
        .map_err(storage)?;
        Ok(Some(cp))
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT OR REPLACE INTO checkpoints
             (chain_id, indexer_id, block_number, log_index, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&checkpoint.chain_id)
        .bind(&checkpoint.indexer_id)
        .bind(checkpoint.block_number as i64)
        .bind(checkpoint.log_index as i64)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        debug!(
            chain_id = %checkpoint.chain_id,
            indexer_id = %checkpoint.indexer_id,
            block = checkpoint.block_number,
            log_index = checkpoint.log_index,
            "checkpoint saved"
        );
        Ok(())
    }

    async fn delete(&self, chain_id: &str, indexer_id: &str) -> Result<(), IndexerError> {
        sqlx::query("DELETE FROM checkpoints WHERE chain_id = ? AND indexer_id = ?")
            .bind(chain_id)
            .bind(indexer_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{auction, bid, dead_letter, settlement};

    // ── CheckpointStore ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn checkpoint_upsert() {
        let store = SqliteStorage::in_memory().await.unwrap();

        for (block, log_index) in [(100, 1), (200, 7)] {
            store
                .save(Checkpoint {
                    chain_id: "ethereum".into(),
                    indexer_id: "auctions".into(),
                    block_number: block,
                    log_index,
                    updated_at: 1_700_000_000,
                })
                .await
                .unwrap();
        }

        // Only one row; second save overwrites the first
        let loaded = store.load("ethereum", "auctions").await.unwrap().unwrap();
        assert_eq!(loaded.block_number, 200);
        assert_eq!(loaded.log_index, 7);
        assert_eq!(loaded.updated_at, 1_700_000_000);

        store.delete("ethereum", "auctions").await.unwrap();
        assert!(store.load("ethereum", "auctions").await.unwrap().is_none());
    }

    // ── Auctions and bids ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn auction_roundtrip_and_duplicate() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let a = auction(7, 10);
        assert_eq!(store.insert_auction(&a).await.unwrap(), ApplyOutcome::Applied);
        assert_eq!(store.insert_auction(&auction(7, 99)).await.unwrap(), ApplyOutcome::Duplicate);
        assert_eq!(store.auction(7).await.unwrap().unwrap(), a);
        assert!(store.auction(8).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bid_is_applied_atomically_once() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store.insert_auction(&auction(7, 10)).await.unwrap();

        let b = bid(7, "0xb1", "1500", 11, 2);
        assert!(store.apply_bid(&b, BidPolicy::TrustContract).await.unwrap().is_applied());
        assert_eq!(
            store.apply_bid(&b, BidPolicy::TrustContract).await.unwrap(),
            ApplyOutcome::Duplicate
        );

        let a = store.auction(7).await.unwrap().unwrap();
        assert_eq!(a.bid_count, 1);
        assert_eq!(a.highest_bid, "1500");
        assert_eq!(a.highest_bidder, "0xbb");
        assert_eq!(a.updated_block, 11);
        assert_eq!(store.bid("0xB1").await.unwrap().unwrap(), b);
    }

    #[tokio::test]
    async fn orphan_events_write_nothing() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let err = store
            .apply_bid(&bid(9, "0xb1", "1", 11, 0), BidPolicy::TrustContract)
            .await
            .unwrap_err();
        assert!(err.is_parent_missing());
        assert!(store.bid("0xb1").await.unwrap().is_none());

        let err = store.apply_settlement(&settlement(9, "1", 12)).await.unwrap_err();
        assert!(err.is_parent_missing());
        assert_eq!(store.counts().await.unwrap(), StoreCounts::default());
    }

    #[tokio::test]
    async fn settlement_is_terminal() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store.insert_auction(&auction(7, 10)).await.unwrap();
        store
            .apply_bid(&bid(7, "0xb1", "1500", 11, 0), BidPolicy::TrustContract)
            .await
            .unwrap();

        assert!(store.apply_settlement(&settlement(7, "1600", 20)).await.unwrap().is_applied());
        assert_eq!(
            store.apply_settlement(&settlement(7, "9999", 21)).await.unwrap(),
            ApplyOutcome::Duplicate
        );
        assert_eq!(
            store
                .apply_bid(&bid(7, "0xlate", "5000", 22, 0), BidPolicy::TrustContract)
                .await
                .unwrap(),
            ApplyOutcome::Stale
        );

        let a = store.auction(7).await.unwrap().unwrap();
        assert!(a.ended);
        assert_eq!(a.end_time, Some(4700));
        assert_eq!(a.highest_bid, "1600");
        assert_eq!(a.bid_count, 1);
        assert!(store.bid("0xlate").await.unwrap().is_none());

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.auctions, 1);
        assert_eq!(counts.ended_auctions, 1);
        assert_eq!(counts.bids, 1);
    }

    #[tokio::test]
    async fn require_increasing_rejects_equal_bid() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store.insert_auction(&auction(7, 10)).await.unwrap();
        store
            .apply_bid(&bid(7, "0x1", "1500", 11, 0), BidPolicy::RequireIncreasing)
            .await
            .unwrap();
        let out = store
            .apply_bid(&bid(7, "0x2", "1500", 12, 0), BidPolicy::RequireIncreasing)
            .await
            .unwrap();
        assert_eq!(out, ApplyOutcome::NotIncreasing);
        assert!(store.bid("0x2").await.unwrap().is_none());
        assert_eq!(store.auction(7).await.unwrap().unwrap().bid_count, 1);
    }

    #[tokio::test]
    async fn bids_newest_first_and_last_block() {
        let store = SqliteStorage::in_memory().await.unwrap();
        assert_eq!(store.last_applied_block().await.unwrap(), None);

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
        let store = SqliteStorage::in_memory().await.unwrap();
        store.record_unreconciled(&dead_letter("0xe", 2)).await.unwrap();
        store.record_unreconciled(&dead_letter("0xe", 2)).await.unwrap();

        let dead = store.unreconciled().await.unwrap();
        assert_eq!(dead, vec![dead_letter("0xe", 2)]);
    }

    #[tokio::test]
    async fn file_backed_store_persists() {
        let path = std::env::temp_dir().join(format!("auctionindex-{}.db", std::process::id()));
        let path_str = path.to_string_lossy().to_string();
        {
            let store = SqliteStorage::open(&path_str).await.unwrap();
            store.insert_auction(&auction(3, 5)).await.unwrap();
        }
        let reopened = SqliteStorage::open(&path_str).await.unwrap();
        assert!(reopened.auction(3).await.unwrap().is_some());
        drop(reopened);
        let _ = std::fs::remove_file(&path);
    }
}
