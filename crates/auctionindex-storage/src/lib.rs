//! auctionindex-storage: storage backends for AuctionIndex.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)
//!
//! Both implement `AuctionStore` and `CheckpointStore` from
//! `auctionindex-core`.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(test)]
mod fixtures;

pub use memory::InMemoryStorage;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
