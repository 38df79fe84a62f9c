//! Seams between the reconnect supervisor and a streaming chain provider.
//!
//! A [`ChainProvider`] opens one connection per call to
//! [`ChainProvider::subscribe`] and reports everything it observes (logs and
//! transport errors alike) through the [`EventSender`] it was handed. Each
//! sender is stamped with the generation of the connection it belongs to, so
//! the supervisor can drop events from a connection it has already retired.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::models::RawLog;

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_EVENT_SIGNATURE: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// `eth_subscribe("logs", filter)` parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogFilter {
    pub address: String,
    pub topics: Vec<Option<String>>,
}

impl LogFilter {
    /// Transfer events emitted by one token contract
    pub fn transfer_events(token_address: &str) -> Self {
        Self {
            address: token_address.to_string(),
            topics: vec![Some(TRANSFER_EVENT_SIGNATURE.to_string())],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    Log(RawLog),
    Error(TransportError),
}

/// A provider event stamped with the generation of the connection that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEvent {
    pub generation: u64,
    pub event: ProviderEvent,
}

/// The single channel through which a connection reports logs and failures
#[derive(Debug, Clone)]
pub struct EventSender {
    generation: u64,
    tx: mpsc::Sender<TaggedEvent>,
}

impl EventSender {
    pub fn new(generation: u64, tx: mpsc::Sender<TaggedEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the supervisor has gone away
    pub async fn send_log(&self, log: RawLog) -> bool {
        self.send(ProviderEvent::Log(log)).await
    }

    pub async fn send_error(&self, error: TransportError) -> bool {
        self.send(ProviderEvent::Error(error)).await
    }

    async fn send(&self, event: ProviderEvent) -> bool {
        self.tx
            .send(TaggedEvent {
                generation: self.generation,
                event,
            })
            .await
            .is_ok()
    }
}

/// Opens streaming log subscriptions against a chain node
#[async_trait]
pub trait ChainProvider: Send + Sync {
    fn endpoint(&self) -> &str;

    /// Connect and subscribe. Failures after this returns are reported through `events`.
    async fn subscribe(
        &self,
        filter: &LogFilter,
        events: EventSender,
    ) -> Result<Box<dyn Subscription>, TransportError>;
}

/// A live subscription and the connection behind it
#[async_trait]
pub trait Subscription: Send {
    fn id(&self) -> &str;

    /// Stop listeners and close the socket. Calling it again is a no-op.
    async fn teardown(&mut self);
}
