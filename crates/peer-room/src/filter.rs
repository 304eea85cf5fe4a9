//! Sender filtering for inbound messages.

use crate::transport::{InboundMessage, MessageHandler, Peer, PubSub, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Wraps a transport and drops inbound messages whose sender fails `accept`.
///
/// Publishing passes through untouched.
pub struct PeerFilter<T> {
    inner: T,
    accept: Arc<dyn Fn(&Peer) -> bool + Send + Sync>,
}

impl<T: PubSub> PeerFilter<T> {
    pub fn new(inner: T, accept: impl Fn(&Peer) -> bool + Send + Sync + 'static) -> Self {
        Self {
            inner,
            accept: Arc::new(accept),
        }
    }

    /// Only accept messages from the given peers.
    pub fn allow_list(inner: T, allowed: impl IntoIterator<Item = Peer>) -> Self {
        let allowed: Vec<Peer> = allowed.into_iter().collect();
        Self::new(inner, move |peer| allowed.contains(peer))
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: PubSub> PubSub for PeerFilter<T> {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.inner.publish(topic, payload, cancel).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
        cancel: CancellationToken,
    ) -> Result<()> {
        let accept = Arc::clone(&self.accept);
        let filtered: MessageHandler = Arc::new(move |msg: InboundMessage| {
            if accept(&msg.sender) {
                handler(msg);
            } else {
                trace!("Filtered message from {}", msg.sender.id.short());
            }
        });
        self.inner.subscribe(topic, filtered, cancel).await
    }
}
