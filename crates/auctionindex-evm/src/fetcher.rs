//! EVM log fetcher.
//!
//! Uses JSON-RPC `eth_blockNumber` and `eth_getLogs` over HTTP, with range
//! splitting for large catch-ups and exponential backoff for transient
//! transport failures.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use auctionindex_core::error::IndexerError;
use auctionindex_core::events::EventMeta;
use auctionindex_core::retry::{RetryConfig, RetryPolicy};
use auctionindex_core::types::{LogFilter, LogPosition};

/// A log as it appears on the wire (`eth_getLogs` result item or
/// `eth_subscription` notification payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: Option<String>,
    #[serde(rename = "transactionHash")]
    pub tx_hash: Option<String>,
    #[serde(rename = "logIndex")]
    pub log_index: Option<String>,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RpcLog {
    /// Parse the hex fields. Pending logs (no block number yet) and logs
    /// without a transaction hash are rejected: they cannot be placed.
    ///
    /// Bad topic or data hex does not fail the conversion. The log keeps its
    /// position and carries the reason in `malformed`, so the decoder
    /// rejects just this log.
    pub fn into_raw(self) -> Result<RawLog, String> {
        let block_number = self
            .block_number
            .as_deref()
            .and_then(parse_hex_u64)
            .ok_or_else(|| format!("log without block number: {:?}", self.block_number))?;
        let log_index = self
            .log_index
            .as_deref()
            .and_then(parse_hex_u64)
            .and_then(|i| u32::try_from(i).ok())
            .ok_or_else(|| format!("bad log index: {:?}", self.log_index))?;
        let tx_hash = self.tx_hash.ok_or("log without transaction hash")?;

        let payload = self
            .topics
            .iter()
            .map(|t| t.parse::<B256>().map_err(|e| format!("bad topic '{t}': {e}")))
            .collect::<Result<Vec<_>, _>>()
            .and_then(|topics| {
                let data_hex = self.data.strip_prefix("0x").unwrap_or(&self.data);
                let data = hex::decode(data_hex).map_err(|e| format!("bad log data: {e}"))?;
                Ok((topics, data))
            });
        let (topics, data, malformed) = match payload {
            Ok((topics, data)) => (topics, data, None),
            Err(reason) => (Vec::new(), Vec::new(), Some(reason)),
        };

        Ok(RawLog {
            address: self.address.to_lowercase(),
            topics,
            data,
            tx_hash: tx_hash.to_lowercase(),
            block_number,
            log_index,
            removed: self.removed.unwrap_or(false),
            malformed,
        })
    }
}

/// A raw EVM log, hex fields decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: String,
    /// topic 0 = event signature hash; 1.. = indexed parameters.
    pub topics: Vec<B256>,
    /// ABI-encoded non-indexed parameters.
    pub data: Vec<u8>,
    pub tx_hash: String,
    pub block_number: u64,
    pub log_index: u32,
    /// `true` if the log was dropped by a reorg.
    pub removed: bool,
    /// Set when the topics or data were not valid hex; both are then empty.
    pub malformed: Option<String>,
}

impl RawLog {
    pub fn position(&self) -> LogPosition {
        LogPosition::new(self.block_number, self.log_index)
    }

    pub fn meta(&self) -> EventMeta {
        EventMeta {
            tx_hash: self.tx_hash.clone(),
            block_number: self.block_number,
            log_index: self.log_index,
        }
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed
    }
}

/// `params[0]` for `eth_getLogs` / the filter object of `eth_subscribe("logs")`.
pub fn filter_object(filter: &LogFilter, range: Option<(u64, u64)>) -> Value {
    let mut obj = serde_json::Map::new();
    if let Some((from, to)) = range {
        obj.insert("fromBlock".into(), json!(format!("0x{from:x}")));
        obj.insert("toBlock".into(), json!(format!("0x{to:x}")));
    }
    if !filter.addresses.is_empty() {
        obj.insert("address".into(), json!(filter.addresses));
    }
    if !filter.topic0_values.is_empty() {
        obj.insert("topics".into(), json!([filter.topic0_values]));
    }
    Value::Object(obj)
}

/// HTTP JSON-RPC client backed by `reqwest`.
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    retry: RetryPolicy,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    pub fn new(
        url: impl Into<String>,
        retry: RetryConfig,
        request_timeout: Duration,
    ) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| IndexerError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
            retry: RetryPolicy::new(retry),
            next_id: AtomicU64::new(1),
        })
    }

    async fn send_once(&self, body: &Value) -> Result<Value, String> {
        let resp = self
            .http
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("HTTP {status}: {text}"));
        }

        resp.json::<Value>().await.map_err(|e| e.to_string())
    }

    /// Send one request, retrying transport failures. A JSON-RPC error
    /// object in the response is returned as-is, without retry.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, IndexerError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let mut attempt = 0u32;
        let resp = loop {
            attempt += 1;
            match self.send_once(&body).await {
                Ok(resp) => break resp,
                Err(e) => match self.retry.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            method,
                            "retrying request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(attempt, error = %e, method, "max retries exceeded");
                        return Err(IndexerError::Rpc(format!("{method}: {e}")));
                    }
                },
            }
        };

        if let Some(err) = resp.get("error").filter(|e| !e.is_null()) {
            let code = err["code"].as_i64().unwrap_or_default();
            let message = err["message"].as_str().unwrap_or("unknown error");
            return Err(IndexerError::Rpc(format!("{method}: {code} {message}")));
        }
        Ok(resp.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Current chain head.
    pub async fn block_number(&self) -> Result<u64, IndexerError> {
        let v = self.call("eth_blockNumber", json!([])).await?;
        v.as_str()
            .and_then(parse_hex_u64)
            .ok_or_else(|| IndexerError::Rpc(format!("eth_blockNumber: unexpected result {v}")))
    }

    /// All logs in `[from, to]` matching the filter, in node order.
    pub async fn get_logs(
        &self,
        from: u64,
        to: u64,
        filter: &LogFilter,
    ) -> Result<Vec<RawLog>, IndexerError> {
        let v = self
            .call("eth_getLogs", json!([filter_object(filter, Some((from, to)))]))
            .await?;
        let logs: Vec<RpcLog> = serde_json::from_value(v)
            .map_err(|e| IndexerError::Rpc(format!("eth_getLogs: malformed result: {e}")))?;
        Ok(logs
            .into_iter()
            .filter_map(|l| match l.into_raw() {
                Ok(raw) => Some(raw),
                Err(e) => {
                    tracing::warn!(from, to, error = %e, "skipping unplaceable log");
                    None
                }
            })
            .collect())
    }

    /// Fetch `[from, to]`, split into windows of at most `max_range` blocks.
    pub async fn logs(
        &self,
        from: u64,
        to: u64,
        filter: &LogFilter,
        max_range: u64,
    ) -> Result<Vec<RawLog>, IndexerError> {
        if to < from {
            return Ok(vec![]);
        }
        let max_range = max_range.max(1);
        let mut all_logs = Vec::new();
        let mut start = from;
        while start <= to {
            let end = start.saturating_add(max_range - 1).min(to);
            let chunk = self.get_logs(start, end, filter).await?;
            all_logs.extend(chunk);
            if end == u64::MAX {
                break;
            }
            start = end + 1;
        }
        Ok(all_logs)
    }
}

/// Parse a hex-encoded string (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc_log() -> RpcLog {
        serde_json::from_value(json!({
            "address": "0xAbC0000000000000000000000000000000000001",
            "topics": ["0x2e296671c28b83e813c76e2acf7481f5a2cc46aaeb9bcf33b3e048f50e9c33e9"],
            "data": "0x0102",
            "blockNumber": "0x12a05f200",
            "blockHash": "0x00",
            "transactionHash": "0xABCD",
            "logIndex": "0x5",
            "removed": false
        }))
        .unwrap()
    }

    #[test]
    fn parse_hex_u64_basic() {
        assert_eq!(parse_hex_u64("0x1"), Some(1));
        assert_eq!(parse_hex_u64("0xff"), Some(255));
        assert_eq!(parse_hex_u64("1234"), Some(0x1234));
        assert_eq!(parse_hex_u64("0xzz"), None);
    }

    #[test]
    fn rpc_log_into_raw() {
        let log = rpc_log().into_raw().unwrap();
        assert_eq!(log.block_number, 5_000_000_000);
        assert_eq!(log.log_index, 5);
        assert_eq!(log.data, vec![1, 2]);
        assert_eq!(log.tx_hash, "0xabcd");
        assert_eq!(log.address, "0xabc0000000000000000000000000000000000001");
        assert_eq!(log.topics.len(), 1);
        assert!(!log.is_removed());
        assert_eq!(log.position(), LogPosition::new(5_000_000_000, 5));
    }

    #[test]
    fn bad_hex_payload_keeps_position() {
        let mut log = rpc_log();
        log.data = "0xzz".into();
        let raw = log.into_raw().unwrap();
        assert_eq!(raw.position(), LogPosition::new(5_000_000_000, 5));
        assert!(raw.topics.is_empty());
        assert!(raw.malformed.as_deref().unwrap().contains("bad log data"));

        let mut log = rpc_log();
        log.topics = vec!["0x12".into()];
        let raw = log.into_raw().unwrap();
        assert!(raw.malformed.as_deref().unwrap().contains("bad topic"));
        assert!(rpc_log().into_raw().unwrap().malformed.is_none());
    }

    #[test]
    fn pending_log_is_rejected() {
        let mut log = rpc_log();
        log.block_number = None;
        assert!(log.into_raw().is_err());
    }

    #[test]
    fn filter_object_shape() {
        let f = LogFilter::address("0xabc").topic0("0x01").topic0("0x02");
        let v = filter_object(&f, Some((16, 31)));
        assert_eq!(v["fromBlock"], "0x10");
        assert_eq!(v["toBlock"], "0x1f");
        assert_eq!(v["address"], json!(["0xabc"]));
        assert_eq!(v["topics"], json!([["0x01", "0x02"]]));

        let v = filter_object(&LogFilter::default(), None);
        assert!(v.get("fromBlock").is_none());
        assert!(v.get("address").is_none());
    }
}
