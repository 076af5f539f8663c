//! `eth_subscribe("logs")` over WebSocket.
//!
//! The subscription is confirmed before a stream is handed out, so a node
//! that refuses the connection or the subscription surfaces as
//! `IndexerError::Subscribe`. After that a background task owns the socket,
//! answers pings, and forwards notifications into a bounded channel.

use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use auctionindex_core::error::IndexerError;
use auctionindex_core::types::LogFilter;

use crate::fetcher::{filter_object, RawLog, RpcLog};
use crate::source::LogStream;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SUBSCRIBE_ID: u64 = 1;
const CHANNEL_CAPACITY: usize = 1024;

/// Connect to `url`, subscribe to logs matching `filter`, and return the
/// live log stream. `confirm_timeout` bounds the whole handshake: connect,
/// request and confirmation.
pub async fn subscribe_logs(
    url: &str,
    filter: &LogFilter,
    confirm_timeout: Duration,
) -> Result<LogStream, IndexerError> {
    tracing::info!(url = %url, "connecting via WebSocket");
    let (sink, stream, sub_id) = tokio::time::timeout(confirm_timeout, handshake(url, filter))
        .await
        .map_err(|_| {
            IndexerError::Subscribe(format!("subscription handshake with {url} timed out"))
        })??;
    tracing::info!(subscription = %sub_id, "log subscription established");

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(forward(sink, stream, sub_id, tx));

    Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })))
}

async fn handshake(
    url: &str,
    filter: &LogFilter,
) -> Result<(SplitSink<WsStream, Message>, SplitStream<WsStream>, String), IndexerError> {
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| IndexerError::Subscribe(format!("connect {url}: {e}")))?;
    let (mut sink, mut stream) = ws.split();

    let req = json!({
        "jsonrpc": "2.0",
        "id": SUBSCRIBE_ID,
        "method": "eth_subscribe",
        "params": ["logs", filter_object(filter, None)],
    });
    sink.send(Message::Text(req.to_string().into()))
        .await
        .map_err(|e| IndexerError::Subscribe(format!("send eth_subscribe: {e}")))?;

    let sub_id = await_confirmation(&mut sink, &mut stream).await?;
    Ok((sink, stream, sub_id))
}

async fn await_confirmation(
    sink: &mut SplitSink<WsStream, Message>,
    stream: &mut SplitStream<WsStream>,
) -> Result<String, IndexerError> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                let Ok(val) = serde_json::from_str::<Value>(text.as_str()) else {
                    continue;
                };
                if val.get("id").and_then(Value::as_u64) != Some(SUBSCRIBE_ID) {
                    continue;
                }
                if let Some(err) = val.get("error").filter(|e| !e.is_null()) {
                    return Err(IndexerError::Subscribe(format!("node rejected eth_subscribe: {err}")));
                }
                return val["result"]
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| IndexerError::Subscribe(format!("unexpected reply: {val}")));
            }
            Some(Ok(Message::Ping(payload))) => {
                let _ = sink.send(Message::Pong(payload)).await;
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(IndexerError::Subscribe("connection closed before confirmation".into()));
            }
            Some(Err(e)) => return Err(IndexerError::Subscribe(e.to_string())),
            Some(Ok(_)) => {}
        }
    }
}

/// Background task: socket → channel. Ends on the first error, sending it
/// downstream, or when the receiver is dropped.
async fn forward(
    mut sink: SplitSink<WsStream, Message>,
    mut stream: SplitStream<WsStream>,
    sub_id: String,
    tx: mpsc::Sender<Result<RawLog, IndexerError>>,
) {
    loop {
        let msg = tokio::select! {
            _ = tx.closed() => {
                let _ = sink.close().await;
                return;
            }
            msg = stream.next() => msg,
        };

        let item = match msg {
            Some(Ok(Message::Text(text))) => match notification(text.as_str(), &sub_id) {
                Notification::Log(log) if log.is_removed() => {
                    tracing::debug!(tx = %log.tx_hash, "dropping removed log");
                    continue;
                }
                Notification::Log(log) => Ok(log),
                Notification::Malformed(e) => Err(IndexerError::Stream(e)),
                Notification::Other => continue,
            },
            Some(Ok(Message::Ping(payload))) => {
                let _ = sink.send(Message::Pong(payload)).await;
                continue;
            }
            Some(Ok(Message::Close(_))) | None => Err(IndexerError::Stream("connection closed".into())),
            Some(Err(e)) => Err(IndexerError::Stream(e.to_string())),
            Some(Ok(_)) => continue,
        };

        let terminal = item.is_err();
        if tx.send(item).await.is_err() || terminal {
            return;
        }
    }
}

enum Notification {
    Log(RawLog),
    Malformed(String),
    Other,
}

fn notification(text: &str, sub_id: &str) -> Notification {
    let Ok(val) = serde_json::from_str::<Value>(text) else {
        return Notification::Other;
    };
    if val.get("method").and_then(Value::as_str) != Some("eth_subscription") {
        return Notification::Other;
    }
    let params = &val["params"];
    if params["subscription"].as_str() != Some(sub_id) {
        return Notification::Other;
    }
    match serde_json::from_value::<RpcLog>(params["result"].clone()) {
        Ok(log) => match log.into_raw() {
            Ok(raw) => Notification::Log(raw),
            Err(e) => Notification::Malformed(e),
        },
        Err(e) => Notification::Malformed(format!("malformed log notification: {e}")),
    }
}
