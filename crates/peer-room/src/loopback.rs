//! In-process pubsub transport.
//!
//! Each `LoopbackPubSub` is an endpoint owned by one peer. Publishing delivers
//! to the endpoint's own subscribers and to the subscribers of every linked
//! endpoint, synchronously on the publishing task. Useful for tests and for
//! simulating a mesh without a daemon.

use crate::transport::{InboundMessage, MessageHandler, Peer, PubSub, Result, TransportError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tokio_util::sync::CancellationToken;
use tracing::trace;

struct Subscriber {
    topic: String,
    handler: MessageHandler,
    cancel: CancellationToken,
}

struct Endpoint {
    peer: Peer,
    subscribers: RwLock<Vec<Subscriber>>,
    links: RwLock<Vec<Weak<Endpoint>>>,
    next_seq: AtomicU64,
    disconnected: AtomicBool,
}

impl Endpoint {
    /// Live handlers for `topic`, dropping cancelled subscriptions.
    fn handlers_for(&self, topic: &str) -> Vec<MessageHandler> {
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|s| !s.cancel.is_cancelled());
        subscribers
            .iter()
            .filter(|s| s.topic == topic)
            .map(|s| Arc::clone(&s.handler))
            .collect()
    }
}

/// An in-memory pubsub endpoint. Cloning yields another handle to the same endpoint.
#[derive(Clone)]
pub struct LoopbackPubSub {
    inner: Arc<Endpoint>,
}

impl LoopbackPubSub {
    /// Create an endpoint that publishes as `peer`.
    pub fn new(peer: Peer) -> Self {
        Self {
            inner: Arc::new(Endpoint {
                peer,
                subscribers: RwLock::new(Vec::new()),
                links: RwLock::new(Vec::new()),
                next_seq: AtomicU64::new(1),
                disconnected: AtomicBool::new(false),
            }),
        }
    }

    /// The peer this endpoint publishes as.
    pub fn peer(&self) -> &Peer {
        &self.inner.peer
    }

    /// Link two endpoints so each receives what the other publishes.
    pub fn link(&self, other: &LoopbackPubSub) {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return;
        }
        Self::add_link(&self.inner, &other.inner);
        Self::add_link(&other.inner, &self.inner);
    }

    /// Undo `link` in both directions.
    pub fn unlink(&self, other: &LoopbackPubSub) {
        Self::remove_link(&self.inner, &other.inner);
        Self::remove_link(&other.inner, &self.inner);
    }

    /// Link every endpoint in `endpoints` with every other.
    pub fn mesh(endpoints: &[LoopbackPubSub]) {
        for (i, a) in endpoints.iter().enumerate() {
            for b in &endpoints[i + 1..] {
                a.link(b);
            }
        }
    }

    /// Make every publish fail until `reconnect` is called.
    pub fn disconnect(&self) {
        self.inner.disconnected.store(true, Ordering::Release);
    }

    pub fn reconnect(&self) {
        self.inner.disconnected.store(false, Ordering::Release);
    }

    /// Number of live subscriptions on this endpoint.
    pub fn subscription_count(&self) -> usize {
        let mut subscribers = self
            .inner
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|s| !s.cancel.is_cancelled());
        subscribers.len()
    }

    fn add_link(from: &Arc<Endpoint>, to: &Arc<Endpoint>) {
        let mut links = from.links.write().unwrap_or_else(|e| e.into_inner());
        links.retain(|w| w.strong_count() > 0);
        if !links.iter().any(|w| w.as_ptr() == Arc::as_ptr(to)) {
            links.push(Arc::downgrade(to));
        }
    }

    fn remove_link(from: &Arc<Endpoint>, to: &Arc<Endpoint>) {
        from.links
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|w| w.strong_count() > 0 && w.as_ptr() != Arc::as_ptr(to));
    }

    fn targets(&self) -> Vec<Arc<Endpoint>> {
        let links = self.inner.links.read().unwrap_or_else(|e| e.into_inner());
        std::iter::once(Arc::clone(&self.inner))
            .chain(links.iter().filter_map(Weak::upgrade))
            .collect()
    }
}

#[async_trait]
impl PubSub for LoopbackPubSub {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        if self.inner.disconnected.load(Ordering::Acquire) {
            return Err(TransportError::Disconnected);
        }

        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut delivered = 0;
        for endpoint in self.targets() {
            for handler in endpoint.handlers_for(topic) {
                handler(InboundMessage::new(
                    self.inner.peer.clone(),
                    topic,
                    seq.to_be_bytes().to_vec(),
                    payload.clone(),
                ));
                delivered += 1;
            }
        }

        trace!("Loopback delivered seq {} on {} to {} handler(s)", seq, topic, delivered);
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
        cancel: CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Ok(());
        }
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Subscriber {
                topic: topic.to_string(),
                handler,
                cancel,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PeerId;
    use std::sync::Mutex;

    fn endpoint(name: &str) -> LoopbackPubSub {
        LoopbackPubSub::new(Peer::new(PeerId::from_public_key(name.as_bytes())))
    }

    fn collector() -> (MessageHandler, Arc<Mutex<Vec<InboundMessage>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let handler: MessageHandler = Arc::new(move |msg| sink.lock().unwrap().push(msg));
        (handler, received)
    }

    #[tokio::test]
    async fn test_publish_reaches_local_and_linked_subscribers() {
        let a = endpoint("a");
        let b = endpoint("b");
        let c = endpoint("c");
        a.link(&b);

        let (ha, ra) = collector();
        let (hb, rb) = collector();
        let (hc, rc) = collector();
        a.subscribe("t", ha, CancellationToken::new()).await.unwrap();
        b.subscribe("t", hb, CancellationToken::new()).await.unwrap();
        c.subscribe("t", hc, CancellationToken::new()).await.unwrap();

        a.publish("t", b"hi".to_vec(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(ra.lock().unwrap().len(), 1);
        let rb = rb.lock().unwrap();
        assert_eq!(rb.len(), 1);
        assert_eq!(rb[0].sender, *a.peer());
        assert_eq!(rb[0].payload, b"hi");
        assert!(rc.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let a = endpoint("a");
        let (h, r) = collector();
        a.subscribe("one", h, CancellationToken::new()).await.unwrap();

        a.publish("two", b"x".to_vec(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(r.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_subscription_stops_delivery() {
        let a = endpoint("a");
        let (h, r) = collector();
        let cancel = CancellationToken::new();
        a.subscribe("t", h, cancel.clone()).await.unwrap();
        assert_eq!(a.subscription_count(), 1);

        cancel.cancel();
        a.publish("t", b"x".to_vec(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(r.lock().unwrap().is_empty());
        assert_eq!(a.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_unlink_and_disconnect() {
        let a = endpoint("a");
        let b = endpoint("b");
        LoopbackPubSub::mesh(&[a.clone(), b.clone()]);
        let (h, r) = collector();
        b.subscribe("t", h, CancellationToken::new()).await.unwrap();

        a.unlink(&b);
        a.publish("t", b"x".to_vec(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(r.lock().unwrap().is_empty());

        a.disconnect();
        assert!(matches!(
            a.publish("t", b"x".to_vec(), &CancellationToken::new()).await,
            Err(TransportError::Disconnected)
        ));
        a.reconnect();
        assert!(a.publish("t", b"x".to_vec(), &CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_publish() {
        let a = endpoint("a");
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            a.publish("t", Vec::new(), &cancel).await,
            Err(TransportError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_sequence_numbers_increase() {
        let a = endpoint("a");
        let (h, r) = collector();
        a.subscribe("t", h, CancellationToken::new()).await.unwrap();

        for _ in 0..3 {
            a.publish("t", Vec::new(), &CancellationToken::new())
                .await
                .unwrap();
        }

        let seqs: Vec<u64> = r
            .lock()
            .unwrap()
            .iter()
            .map(|m| u64::from_be_bytes(m.sequence_number.clone().try_into().unwrap()))
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }
}
