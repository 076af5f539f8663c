//! The listener supervisor: drives ingestion and fails over between modes.
//!
//! # Starting
//! Resume the cursor (checkpoint → highest applied block → start block)
//! and try to subscribe.
//!
//! # Subscribed
//! Catch up from the cursor to the head first (the subscription is already
//! open, so nothing is missed in between), then apply pushed logs as they
//! arrive. Parked events are retried when due. A stream error ends the
//! session.
//!
//! # Polling
//! Fetch `[cursor, head]` in `batch_size` windows and apply every log, then
//! drain parked events, then try to subscribe again. If that fails, wait
//! `poll_interval_ms` and repeat.
//!
//! Cancellation is honoured between events, never inside one.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use auctionindex_core::checkpoint::{CheckpointManager, CheckpointStore};
use auctionindex_core::cursor::Cursor;
use auctionindex_core::error::IndexerError;
use auctionindex_core::events::ChainEvent;
use auctionindex_core::listener::{ListenerConfig, ListenerState};
use auctionindex_core::reconciler::Reconciler;
use auctionindex_core::retry::RetryPolicy;
use auctionindex_core::store::AuctionStore;
use auctionindex_core::types::{LogFilter, LogPosition};

use crate::decoder::AuctionEventDecoder;
use crate::fetcher::RawLog;
use crate::metrics::ListenerMetrics;
use crate::source::{ChainSource, LogStream};

/// Cheap, cloneable view of a running listener.
#[derive(Clone)]
pub struct ListenerHandle {
    state: Arc<Mutex<ListenerState>>,
    metrics: Arc<Mutex<ListenerMetrics>>,
    cancel: CancellationToken,
}

impl ListenerHandle {
    pub fn state(&self) -> ListenerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn metrics(&self) -> ListenerMetrics {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Ask the listener to stop after the event in progress.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// How a push session ended.
enum Session {
    Cancelled,
    Lost { delivered: u64 },
}

pub struct Supervisor {
    config: ListenerConfig,
    source: Arc<dyn ChainSource>,
    store: Arc<dyn AuctionStore>,
    decoder: AuctionEventDecoder,
    reconciler: Reconciler,
    checkpoint: CheckpointManager,
    cursor: Cursor,
    /// Highest position handled so far, applied or parked.
    high_water: Option<LogPosition>,
    filter: LogFilter,
    connection_retry: RetryPolicy,
    state: Arc<Mutex<ListenerState>>,
    metrics: Arc<Mutex<ListenerMetrics>>,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(
        config: ListenerConfig,
        source: Arc<dyn ChainSource>,
        store: Arc<dyn AuctionStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        cancel: CancellationToken,
    ) -> Self {
        let decoder = AuctionEventDecoder::new();
        let filter = decoder
            .topics()
            .as_hex()
            .into_iter()
            .fold(LogFilter::address(config.contract_address.to_lowercase()), LogFilter::topic0);
        let reconciler = Reconciler::new(
            store.clone(),
            config.bid_policy,
            RetryPolicy::new(config.parent_retry.clone()),
        );
        let checkpoint = CheckpointManager::new(
            checkpoints,
            &config.chain,
            &config.id,
            config.checkpoint_interval,
        );
        Self {
            cursor: Cursor::new(config.start_block),
            connection_retry: RetryPolicy::new(config.connection_retry.clone()),
            source,
            store,
            decoder,
            reconciler,
            checkpoint,
            high_water: None,
            filter,
            state: Arc::new(Mutex::new(ListenerState::Starting)),
            metrics: Arc::new(Mutex::new(ListenerMetrics::default())),
            cancel,
            config,
        }
    }

    pub fn handle(&self) -> ListenerHandle {
        ListenerHandle {
            state: self.state.clone(),
            metrics: self.metrics.clone(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn state(&self) -> ListenerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn metrics(&self) -> ListenerMetrics {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Run until cancelled. Only configuration and shutdown-checkpoint
    /// failures are returned; everything else is retried.
    pub async fn run(&mut self) -> Result<(), IndexerError> {
        self.config.validate()?;
        self.set_state(ListenerState::Starting);
        self.resume().await?;

        info!(
            listener = %self.config.id,
            chain = %self.config.chain,
            contract = %self.config.contract_address,
            from = self.cursor.fetch_from(),
            "listener starting"
        );

        let mut push = true;
        let mut sessions = 0u64;
        let mut failures = 0u32;

        while !self.cancel.is_cancelled() {
            let mut skip_wait = false;

            if push {
                if let Some(stream) = self.subscribe(&mut sessions).await {
                    match self.push_session(stream).await {
                        Ok(Session::Cancelled) => break,
                        Ok(Session::Lost { delivered }) => {
                            failures = 0;
                            skip_wait = delivered > 0;
                        }
                        Err(e) => {
                            self.on_failure(e, &mut failures).await?;
                            continue;
                        }
                    }
                }
                if !self.config.resubscribe {
                    push = false;
                }
            }
            if self.cancel.is_cancelled() {
                break;
            }

            self.set_state(ListenerState::Polling);
            match self.poll_once().await {
                Ok(()) => failures = 0,
                Err(e) => {
                    self.on_failure(e, &mut failures).await?;
                    continue;
                }
            }

            if !skip_wait || !push {
                let interval = Duration::from_millis(self.config.poll_interval_ms);
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }

        self.shutdown().await
    }

    async fn resume(&mut self) -> Result<(), IndexerError> {
        let start = self.config.start_block;
        self.cursor = if let Some(cp) = self.checkpoint.load().await? {
            info!(block = cp.block_number, log_index = cp.log_index, "resuming from checkpoint");
            Cursor::resume(cp.position(), start)
        } else if let Some(block) = self.store.last_applied_block().await? {
            info!(block, "no checkpoint, resuming from highest applied block");
            Cursor::new(block.max(start))
        } else {
            info!(block = start, "no checkpoint, starting from configured block");
            Cursor::new(start)
        };
        Ok(())
    }

    async fn subscribe(&mut self, sessions: &mut u64) -> Option<LogStream> {
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            r = self.source.subscribe(&self.filter) => r,
        };
        match result {
            Ok(stream) => {
                *sessions += 1;
                if *sessions > 1 {
                    self.with_metrics(|m| m.resubscribes += 1);
                    info!(sessions = *sessions, "resubscribed");
                }
                Some(stream)
            }
            Err(e) => {
                warn!(error = %e, "subscribe failed, polling instead");
                None
            }
        }
    }

    async fn push_session(&mut self, mut stream: LogStream) -> Result<Session, IndexerError> {
        self.catch_up().await?;
        if self.cancel.is_cancelled() {
            return Ok(Session::Cancelled);
        }
        self.set_state(ListenerState::Subscribed);

        let mut delivered = 0u64;
        loop {
            let due = self.reconciler.next_due();
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(Session::Cancelled),
                _ = wait_until(due) => {
                    self.reconciler.retry_due().await?;
                    self.advance(None).await?;
                }
                item = stream.next() => match item {
                    Some(Ok(log)) => {
                        delivered += 1;
                        self.handle_log(log).await?;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, delivered, "subscription lost, catching up by polling");
                        return Ok(Session::Lost { delivered });
                    }
                    None => {
                        warn!(delivered, "subscription ended, catching up by polling");
                        return Ok(Session::Lost { delivered });
                    }
                },
            }
        }
    }

    /// One polling round: catch up to the head, then drain parked events.
    async fn poll_once(&mut self) -> Result<(), IndexerError> {
        self.catch_up().await?;
        self.reconciler.flush_pending(&self.cancel).await?;
        self.advance(None).await
    }

    /// Apply every log from the cursor's block to the current head.
    async fn catch_up(&mut self) -> Result<(), IndexerError> {
        let head = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(()),
            h = self.source.head_block_number() => h?,
        };
        let mut from = self.cursor.fetch_from();
        if from > head {
            debug!(from, head, "nothing to catch up");
            return Ok(());
        }
        info!(from, head, "catching up");

        let batch = self.config.batch_size.max(1);
        while from <= head {
            let to = from.saturating_add(batch - 1).min(head);
            let mut logs = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                r = self.source.fetch_range(&self.filter, from, to) => r?,
            };
            logs.sort_by_key(RawLog::position);
            let count = logs.len();

            for log in logs {
                self.handle_log(log).await?;
                if self.cancel.is_cancelled() {
                    return Ok(());
                }
            }
            self.reconciler.retry_due().await?;
            self.advance(None).await?;

            info!(from, to, head, logs = count, "batch complete");
            if to == u64::MAX {
                break;
            }
            from = to + 1;
        }
        Ok(())
    }

    /// Decode and reconcile one log, then move the cursor.
    async fn handle_log(&mut self, log: RawLog) -> Result<(), IndexerError> {
        self.with_metrics(|m| m.logs_received += 1);
        let position = log.position();

        if log.is_removed() || !self.filter.matches_address(&log.address) {
            debug!(%position, address = %log.address, "ignoring log");
            return Ok(());
        }
        if self.cursor.covers(position) {
            debug!(%position, "log already applied");
            return Ok(());
        }

        match self.decoder.decode(&log) {
            Ok(event) => {
                self.reconciler.apply(ChainEvent::new(log.meta(), event)).await?;
            }
            Err(e) => {
                self.with_metrics(|m| m.decode_errors += 1);
                warn!(%position, tx = %log.tx_hash, error = %e, "skipping undecodable log");
            }
        }
        self.advance(Some(position)).await
    }

    /// Move the cursor as far as parked events allow, checkpointing as
    /// configured.
    async fn advance(&mut self, handled: Option<LogPosition>) -> Result<(), IndexerError> {
        if handled.is_some() {
            self.high_water = self.high_water.max(handled);
        }
        let stats = self.reconciler.stats();
        self.with_metrics(|m| m.absorb(stats));

        let target = match self.reconciler.oldest_pending() {
            None => self.high_water,
            Some(oldest) => handled.filter(|p| *p < oldest),
        };
        if let Some(target) = target {
            if !self.cursor.covers(target) {
                self.cursor.advance(target);
                self.checkpoint.maybe_save(target).await?;
            }
        }
        Ok(())
    }

    /// Log, count, and back off after an aborted batch or session.
    async fn on_failure(&mut self, e: IndexerError, failures: &mut u32) -> Result<(), IndexerError> {
        if e.is_fatal() {
            error!(error = %e, "fatal listener error");
            return Err(e);
        }
        *failures = failures.saturating_add(1);
        let delay = self.connection_retry.backoff(*failures);
        if e.is_connection() {
            warn!(error = %e, attempt = *failures, delay_ms = delay.as_millis() as u64, "chain source unavailable");
        } else {
            self.with_metrics(|m| m.store_failures += 1);
            error!(
                error = %e,
                consecutive_failures = *failures,
                cursor = ?self.cursor.last_applied(),
                delay_ms = delay.as_millis() as u64,
                "batch aborted, retrying from cursor"
            );
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), IndexerError> {
        self.set_state(ListenerState::Stopped);
        if let Some(position) = self.cursor.last_applied() {
            self.checkpoint.force_save(position).await?;
        }
        info!(
            cursor = ?self.cursor.last_applied(),
            pending = self.reconciler.pending_len(),
            "listener stopped"
        );
        Ok(())
    }

    fn set_state(&self, state: ListenerState) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != state {
            info!(from = %*current, to = %state, "listener state");
            *current = state;
        }
    }

    fn with_metrics(&self, f: impl FnOnce(&mut ListenerMetrics)) {
        f(&mut self.metrics.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

async fn wait_until(due: Option<Instant>) {
    match due {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
