//! Checkpoint manager: persists the listener's cursor for crash recovery.
//!
//! A checkpoint stores the last log position whose effects were durably
//! applied. On restart, the listener resumes from the last checkpoint rather
//! than re-scanning from the configured start block.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::types::LogPosition;

/// A persisted checkpoint for a listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Chain slug (e.g. `"ethereum"`).
    pub chain_id: String,
    /// Unique listener identifier.
    pub indexer_id: String,
    /// Block of the last applied log.
    pub block_number: u64,
    /// Log index (within `block_number`) of the last applied log.
    pub log_index: u32,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

impl Checkpoint {
    pub fn position(&self) -> LogPosition {
        LogPosition::new(self.block_number, self.log_index)
    }
}

/// Trait for storing and loading checkpoints.
///
/// Implemented by `InMemoryStorage` and `SqliteStorage`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the latest checkpoint for a given chain + listener pair.
    async fn load(
        &self,
        chain_id: &str,
        indexer_id: &str,
    ) -> Result<Option<Checkpoint>, IndexerError>;

    /// Save (upsert) a checkpoint.
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError>;

    /// Delete a checkpoint (e.g. when resetting a listener).
    async fn delete(&self, chain_id: &str, indexer_id: &str) -> Result<(), IndexerError>;
}

/// Manages checkpoint reads/writes for a listener.
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    chain_id: String,
    indexer_id: String,
    /// How often to save (every N applied logs).
    save_interval: u64,
    /// Logs applied since last save.
    counter: u64,
    /// Position of the most recent save.
    last_saved: Option<LogPosition>,
}

impl CheckpointManager {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        chain_id: impl Into<String>,
        indexer_id: impl Into<String>,
        save_interval: u64,
    ) -> Self {
        Self {
            store,
            chain_id: chain_id.into(),
            indexer_id: indexer_id.into(),
            save_interval: save_interval.max(1),
            counter: 0,
            last_saved: None,
        }
    }

    /// Load the saved checkpoint (returns `None` if none exists).
    pub async fn load(&self) -> Result<Option<Checkpoint>, IndexerError> {
        let cp = self.store.load(&self.chain_id, &self.indexer_id).await?;
        Ok(cp)
    }

    /// Conditionally save a checkpoint every `save_interval` logs.
    ///
    /// Call this after each log's effects are applied.
    pub async fn maybe_save(&mut self, position: LogPosition) -> Result<(), IndexerError> {
        self.counter += 1;
        if self.counter >= self.save_interval {
            self.force_save(position).await?;
        }
        Ok(())
    }

    /// Immediately save a checkpoint (used on shutdown and mode switches).
    ///
    /// Skips the write if `position` was already saved.
    pub async fn force_save(&mut self, position: LogPosition) -> Result<(), IndexerError> {
        if self.last_saved == Some(position) {
            self.counter = 0;
            return Ok(());
        }
        let cp = Checkpoint {
            chain_id: self.chain_id.clone(),
            indexer_id: self.indexer_id.clone(),
            block_number: position.block_number,
            log_index: position.log_index,
            updated_at: chrono::Utc::now().timestamp(),
        };
        self.store.save(cp).await?;
        self.last_saved = Some(position);
        self.counter = 0;
        Ok(())
    }
}
