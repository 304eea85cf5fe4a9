//! PubSub trait for topic-addressed messaging.
//!
//! Implementations:
//! - `LoopbackPubSub` - In-process fan-out between linked endpoints
//! - `PeerFilter` - Drops inbound messages from rejected peers
//! - `EncryptedPubSub` - Password-derived AES-GCM over another transport

use crate::PeerId;
use async_trait::async_trait;
use serde::Serialize;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("Transport disconnected")]
    Disconnected,

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether this error is the expected result of a shutdown.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A participant on a topic.
///
/// Compared and hashed by `id` only.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    /// Unique peer identifier
    pub id: PeerId,
    /// Known addresses (multiaddrs, URLs, ...); informational only
    pub addresses: Vec<String>,
}

impl Peer {
    /// Create a peer with no address information.
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            addresses: Vec::new(),
        }
    }

    /// Create a peer with address information.
    pub fn with_addresses(id: PeerId, addresses: Vec<String>) -> Self {
        Self { id, addresses }
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Peer {}

impl Hash for Peer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// A message delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// Who published the message
    pub sender: Peer,
    /// Topics the message was published on
    pub topics: Vec<String>,
    /// Transport-assigned sequence number
    pub sequence_number: Vec<u8>,
    /// Raw payload
    pub payload: Vec<u8>,
    /// Payload size in bytes as reported by the transport
    pub size: u64,
}

impl InboundMessage {
    /// Create a message on a single topic, with `size` taken from the payload.
    pub fn new(sender: Peer, topic: &str, sequence_number: Vec<u8>, payload: Vec<u8>) -> Self {
        let size = payload.len() as u64;
        Self {
            sender,
            topics: vec![topic.to_string()],
            sequence_number,
            payload,
            size,
        }
    }
}

/// Callback invoked for every message delivered on a subscription.
///
/// May be called from any thread, possibly concurrently.
pub type MessageHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Topic-addressed publish/subscribe primitive.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publish `payload` on `topic`.
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Register `handler` for messages on `topic`.
    ///
    /// Returns once the subscription is registered. Delivery continues until
    /// `cancel` is cancelled.
    async fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
        cancel: CancellationToken,
    ) -> Result<()>;
}

#[async_trait]
impl<T: PubSub + ?Sized> PubSub for Arc<T> {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        (**self).publish(topic, payload, cancel).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
        cancel: CancellationToken,
    ) -> Result<()> {
        (**self).subscribe(topic, handler, cancel).await
    }
}
