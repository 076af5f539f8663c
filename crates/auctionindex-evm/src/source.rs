//! Chain source: where contract logs come from.
//!
//! Two delivery modes. `subscribe` pushes live logs until the stream fails;
//! `fetch_range` pulls a block range on demand. A failure to establish a
//! subscription (`IndexerError::Subscribe`) is distinct from an error on an
//! established stream (`IndexerError::Stream` item), so the supervisor can
//! tell "retry later" from "fall back to polling now".

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use auctionindex_core::error::IndexerError;
use auctionindex_core::retry::RetryConfig;
use auctionindex_core::types::LogFilter;

use crate::fetcher::{HttpRpcClient, RawLog};
use crate::ws;

/// Live logs. An `Err` item is terminal for the stream.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<RawLog, IndexerError>> + Send>>;

#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Open a push subscription for logs matching `filter`.
    async fn subscribe(&self, filter: &LogFilter) -> Result<LogStream, IndexerError>;

    /// Current chain head.
    async fn head_block_number(&self) -> Result<u64, IndexerError>;

    /// All logs in `[from, to]` matching `filter`, ascending by
    /// `(block_number, log_index)`.
    async fn fetch_range(
        &self,
        filter: &LogFilter,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, IndexerError>;
}

/// Connection settings for [`JsonRpcSource`].
#[derive(Debug, Clone)]
pub struct JsonRpcSourceConfig {
    pub http_url: String,
    /// No URL: push mode is unavailable and the listener polls.
    pub ws_url: Option<String>,
    /// Widest block range per `eth_getLogs` call.
    pub max_range: u64,
    pub request_timeout: Duration,
    /// Bound on the whole subscription handshake: connect, `eth_subscribe`
    /// and its confirmation.
    pub subscribe_timeout: Duration,
    pub retry: RetryConfig,
}

impl JsonRpcSourceConfig {
    pub fn new(http_url: impl Into<String>) -> Self {
        Self {
            http_url: http_url.into(),
            ws_url: None,
            max_range: 2000,
            request_timeout: Duration::from_secs(30),
            subscribe_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }

    pub fn ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = Some(url.into());
        self
    }
}

/// Ethereum JSON-RPC chain source: HTTP for pulls, WebSocket for pushes.
pub struct JsonRpcSource {
    http: HttpRpcClient,
    ws_url: Option<String>,
    max_range: u64,
    subscribe_timeout: Duration,
}

impl JsonRpcSource {
    pub fn new(config: JsonRpcSourceConfig) -> Result<Self, IndexerError> {
        let http = HttpRpcClient::new(config.http_url, config.retry, config.request_timeout)?;
        Ok(Self {
            http,
            ws_url: config.ws_url,
            max_range: config.max_range,
            subscribe_timeout: config.subscribe_timeout,
        })
    }
}

#[async_trait]
impl ChainSource for JsonRpcSource {
    async fn subscribe(&self, filter: &LogFilter) -> Result<LogStream, IndexerError> {
        let Some(url) = &self.ws_url else {
            return Err(IndexerError::Subscribe("no WebSocket endpoint configured".into()));
        };
        ws::subscribe_logs(url, filter, self.subscribe_timeout).await
    }

    async fn head_block_number(&self) -> Result<u64, IndexerError> {
        self.http.block_number().await
    }

    async fn fetch_range(
        &self,
        filter: &LogFilter,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, IndexerError> {
        let mut logs = self.http.logs(from, to, filter, self.max_range).await?;
        logs.retain(|l| !l.is_removed());
        logs.sort_by_key(|l| l.position());
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_without_ws_url_fails_distinctly() {
        let source = JsonRpcSource::new(JsonRpcSourceConfig::new("http://127.0.0.1:1")).unwrap();
        let err = match source.subscribe(&LogFilter::default()).await {
            Err(e) => e,
            Ok(_) => panic!("subscribe should fail"),
        };
        assert!(matches!(err, IndexerError::Subscribe(_)));
    }

    #[test]
    fn config_builder() {
        let cfg = JsonRpcSourceConfig::new("http://node").ws_url("ws://node");
        assert_eq!(cfg.ws_url.as_deref(), Some("ws://node"));
        assert_eq!(cfg.max_range, 2000);
    }
}
