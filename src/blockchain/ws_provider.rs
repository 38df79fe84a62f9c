//! JSON-RPC over WebSocket implementation of [`ChainProvider`].
//!
//! Every `subscribe` call opens a fresh socket, sends `eth_subscribe("logs", filter)`
//! and waits for the subscription id. A reader task then forwards matching
//! `eth_subscription` notifications; a watchdog reports the reader's panics as
//! [`TransportError::Fault`].

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::blockchain::provider::{ChainProvider, EventSender, LogFilter, Subscription};
use crate::config::ProviderConfig;
use crate::error::TransportError;
use crate::logging::LogContext;
use crate::models::RawLog;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct JsonRpcMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorObject>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<SubscriptionParams>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct SubscriptionParams {
    subscription: String,
    result: Value,
}

fn request_message(id: u64, method: &str, params: Value) -> Message {
    let request = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    });
    Message::text(request.to_string())
}

pub struct WsProvider {
    endpoint: String,
    connect_timeout: Duration,
    next_id: AtomicU64,
}

impl WsProvider {
    pub fn new(endpoint: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        let context = LogContext::new("ws_provider", "initialization")
            .with_metadata("endpoint", json!(config.endpoint))
            .with_metadata("connect_timeout_seconds", json!(config.connect_timeout_seconds));
        context.info("Initializing WebSocket provider");

        Self::new(
            config.endpoint.clone(),
            Duration::from_secs(config.connect_timeout_seconds),
        )
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Connect and complete the `eth_subscribe` handshake
    async fn open(&self, filter: &LogFilter) -> Result<(WsSink, WsSource, String), TransportError> {
        let (stream, _response) = connect_async(self.endpoint.as_str()).await?;
        let (mut sink, mut source) = stream.split();

        let request_id = self.next_request_id();
        sink.send(request_message(request_id, "eth_subscribe", json!(["logs", filter])))
            .await?;

        let subscription_id = await_subscription_id(&mut source, request_id).await?;
        Ok((sink, source, subscription_id))
    }
}

#[async_trait]
impl ChainProvider for WsProvider {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn subscribe(
        &self,
        filter: &LogFilter,
        events: EventSender,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        let (sink, source, subscription_id) = tokio::time::timeout(self.connect_timeout, self.open(filter))
            .await
            .map_err(|_| TransportError::Timeout {
                seconds: self.connect_timeout.as_secs(),
            })??;

        let reader = tokio::spawn(read_notifications(source, subscription_id.clone(), events.clone()));
        let reader_abort = reader.abort_handle();
        tokio::spawn(watch_reader(reader, events));

        Ok(Box::new(WsSubscription {
            id: subscription_id,
            unsubscribe_request_id: self.next_request_id(),
            sink: Some(sink),
            reader: Some(reader_abort),
        }))
    }
}

/// Read until the response to `request_id` arrives
async fn await_subscription_id(source: &mut WsSource, request_id: u64) -> Result<String, TransportError> {
    while let Some(message) = source.next().await {
        let text = match message? {
            Message::Text(text) => text,
            Message::Close(frame) => {
                return Err(TransportError::Closed(
                    frame.map(|f| f.reason.to_string()).unwrap_or_default(),
                ));
            }
            _ => continue,
        };

        let response: JsonRpcMessage = serde_json::from_str(&text)
            .map_err(|e| TransportError::InvalidResponse(format!("{}: {}", e, text.as_str())))?;

        if response.id.as_ref().and_then(Value::as_u64) != Some(request_id) {
            continue;
        }

        if let Some(error) = response.error {
            return Err(TransportError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        return match response.result {
            Some(Value::String(id)) => Ok(id),
            other => Err(TransportError::InvalidResponse(format!(
                "eth_subscribe returned {:?}",
                other
            ))),
        };
    }

    Err(TransportError::Closed(
        "stream ended before the subscription was confirmed".to_string(),
    ))
}

/// Extract the log from an `eth_subscription` notification for `subscription_id`.
/// Other messages yield `Ok(None)`.
fn parse_notification(text: &str, subscription_id: &str) -> Result<Option<RawLog>, String> {
    let message: JsonRpcMessage = serde_json::from_str(text).map_err(|e| e.to_string())?;

    if message.method.as_deref() != Some("eth_subscription") {
        return Ok(None);
    }
    let params = match message.params {
        Some(params) if params.subscription == subscription_id => params,
        _ => return Ok(None),
    };

    serde_json::from_value(params.result)
        .map(Some)
        .map_err(|e| e.to_string())
}

async fn read_notifications(mut source: WsSource, subscription_id: String, events: EventSender) {
    let context = LogContext::new("ws_provider", "read_notifications")
        .with_generation(events.generation())
        .with_metadata("subscription_id", json!(subscription_id));

    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => match parse_notification(&text, &subscription_id) {
                Ok(Some(log)) => {
                    if !events.send_log(log).await {
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => context
                    .clone()
                    .with_metadata("error", json!(e))
                    .warn("Skipping malformed notification"),
            },
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| format!("code={} reason={}", u16::from(f.code), f.reason.as_str()))
                    .unwrap_or_else(|| "close frame without reason".to_string());
                events.send_error(TransportError::Closed(reason)).await;
                return;
            }
            Ok(_) => {}
            Err(e) => {
                events.send_error(TransportError::from(e)).await;
                return;
            }
        }
    }

    events
        .send_error(TransportError::Closed("stream ended".to_string()))
        .await;
}

/// Report a panicking reader through the same channel as every other failure
async fn watch_reader(reader: JoinHandle<()>, events: EventSender) {
    if let Err(e) = reader.await {
        if e.is_panic() {
            let payload = e.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            events
                .send_error(TransportError::Fault(format!("notification reader panicked: {}", message)))
                .await;
        }
    }
}

pub struct WsSubscription {
    id: String,
    unsubscribe_request_id: u64,
    sink: Option<WsSink>,
    reader: Option<AbortHandle>,
}

#[async_trait]
impl Subscription for WsSubscription {
    fn id(&self) -> &str {
        &self.id
    }

    async fn teardown(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        let Some(mut sink) = self.sink.take() else {
            return;
        };

        let unsubscribe = request_message(self.unsubscribe_request_id, "eth_unsubscribe", json!([self.id]));
        let closed = tokio::time::timeout(TEARDOWN_TIMEOUT, async move {
            // Best effort: the socket is usually already dead when we get here
            let _ = sink.send(unsubscribe).await;
            let _ = sink.close().await;
        })
        .await;

        if closed.is_err() {
            LogContext::new("ws_provider", "teardown")
                .with_metadata("subscription_id", json!(self.id))
                .debug("Socket close timed out");
        }
    }
}

impl Drop for WsSubscription {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUBSCRIPTION: &str = "0x9cef478923ff08bf67fde6c64013158d";

    fn notification(subscription: &str) -> String {
        json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": {
                "subscription": subscription,
                "result": {
                    "address": "0x77c1693f22b49381984377b190a15922b89fb64c",
                    "topics": ["0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"],
                    "data": "0x",
                    "blockNumber": "0x10",
                    "transactionHash": "0xabc",
                    "logIndex": "0x0",
                    "removed": false
                }
            }
        })
        .to_string()
    }

    #[test]
    fn test_parse_notification_for_own_subscription() {
        let log = parse_notification(&notification(SUBSCRIPTION), SUBSCRIPTION)
            .unwrap()
            .unwrap();
        assert_eq!(log.block_number.as_deref(), Some("0x10"));
        assert_eq!(log.transaction_hash.as_deref(), Some("0xabc"));
    }

    #[test]
    fn test_parse_notification_ignores_other_messages() {
        assert_eq!(parse_notification(&notification("0xother"), SUBSCRIPTION), Ok(None));

        let response = json!({"jsonrpc": "2.0", "id": 3, "result": true}).to_string();
        assert_eq!(parse_notification(&response, SUBSCRIPTION), Ok(None));
    }

    #[test]
    fn test_parse_notification_rejects_malformed_log() {
        let text = json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": {"subscription": SUBSCRIPTION, "result": {"topics": 5}}
        })
        .to_string();
        assert!(parse_notification(&text, SUBSCRIPTION).is_err());
        assert!(parse_notification("not json", SUBSCRIPTION).is_err());
    }

    #[test]
    fn test_request_message_shape() {
        let message = request_message(7, "eth_unsubscribe", json!([SUBSCRIPTION]));
        let value: Value = serde_json::from_str(message.to_text().unwrap()).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "eth_unsubscribe");
        assert_eq!(value["params"][0], SUBSCRIPTION);
    }

    #[tokio::test]
    async fn test_subscribe_to_unreachable_endpoint_fails() {
        let provider = WsProvider::new("ws://127.0.0.1:1", Duration::from_secs(2));
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let filter = LogFilter::transfer_events("0x77c1693F22B49381984377B190a15922b89fb64C");

        let result = provider.subscribe(&filter, EventSender::new(1, tx)).await;
        assert!(result.is_err());
    }
}
