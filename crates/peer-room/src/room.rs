//! PeerRoom: presence-aware group messaging on one pubsub topic.
//!
//! Composes the transport subscription, the membership tracker, the heartbeat
//! engine and the event dispatcher. Unless the transport encrypts payloads,
//! a room should be considered publicly joinable.

use crate::config::{ConfigError, RoomConfig};
use crate::events::{self, EventBus, RoomEvent, Subscription};
use crate::heartbeat::HeartbeatEngine;
use crate::presence::MembershipTracker;
use crate::transport::{MessageHandler, Peer, PubSub, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("Invalid room configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Room has been disposed")]
    Disposed,
}

pub type Result<T> = std::result::Result<T, RoomError>;

/// Watches a pubsub topic for other peers that join the room.
pub struct PeerRoom {
    local_peer: Peer,
    topic: String,
    transport: Arc<dyn PubSub>,
    tracker: Arc<MembershipTracker>,
    heartbeat: Arc<HeartbeatEngine>,
    heartbeat_enabled: Arc<AtomicBool>,
    events: Arc<EventBus>,
    cancel: CancellationToken,
    disposed: AtomicBool,
}

impl PeerRoom {
    /// Join the room described by `config`.
    ///
    /// Subscribes to the topic before the first heartbeat is sent. Must be
    /// called from within a Tokio runtime.
    pub async fn join(
        local_peer: Peer,
        transport: impl PubSub + 'static,
        config: RoomConfig,
    ) -> Result<Self> {
        config.validate()?;

        let transport: Arc<dyn PubSub> = Arc::new(transport);
        let cancel = CancellationToken::new();
        let heartbeat_enabled = Arc::new(AtomicBool::new(config.heartbeat_enabled));

        let events = Arc::new(EventBus::new());
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        events::spawn_dispatcher(Arc::clone(&events), event_rx, cancel.clone());

        let tracker = Arc::new(MembershipTracker::new(
            local_peer.clone(),
            config.heartbeat_marker,
            config.heartbeat_expiration,
            Arc::clone(&heartbeat_enabled),
            cancel.clone(),
            event_tx,
        ));

        let weak_tracker = Arc::downgrade(&tracker);
        let handler: MessageHandler = Arc::new(move |msg| {
            if let Some(tracker) = weak_tracker.upgrade() {
                tracker.on_message(msg);
            }
        });
        if let Err(e) = transport
            .subscribe(&config.topic, handler, cancel.child_token())
            .await
        {
            warn!("Failed to subscribe to {}: {}", config.topic, e);
            cancel.cancel();
            return Err(e.into());
        }

        let heartbeat = Arc::new(HeartbeatEngine::new(
            config.topic.clone(),
            config.heartbeat_interval,
            Arc::clone(&transport),
            Arc::clone(&tracker),
            Arc::clone(&heartbeat_enabled),
            cancel.clone(),
        ));
        heartbeat.start();

        info!("Joined room {} as {}", config.topic, local_peer.id.short());

        Ok(Self {
            local_peer,
            topic: config.topic,
            transport,
            tracker,
            heartbeat,
            heartbeat_enabled,
            events,
            cancel,
            disposed: AtomicBool::new(false),
        })
    }

    /// Join `topic` with the default heartbeat interval (500ms) and expiration (2s).
    pub async fn join_with_defaults(
        local_peer: Peer,
        transport: impl PubSub + 'static,
        topic: impl Into<String>,
    ) -> Result<Self> {
        Self::join(local_peer, transport, RoomConfig::new(topic)).await
    }

    /// The peer which represents this node.
    pub fn local_peer(&self) -> &Peer {
        &self.local_peer
    }

    /// The topic used for communication.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Peers currently present in the room, in join order.
    pub fn connected_peers(&self) -> Vec<Peer> {
        self.tracker.connected_peers()
    }

    pub fn heartbeat_enabled(&self) -> bool {
        self.heartbeat_enabled.load(Ordering::Acquire)
    }

    /// Enable or disable this peer's heartbeat.
    ///
    /// While disabled, other peers stop seeing this peer and incoming
    /// heartbeats no longer refresh membership, so the room quietly empties.
    /// Until they are evicted, connected peers' heartbeats arrive as messages.
    pub fn set_heartbeat_enabled(&self, enabled: bool) {
        self.heartbeat_enabled.store(enabled, Ordering::Release);
    }

    pub fn heartbeat_marker(&self) -> Vec<u8> {
        self.tracker.heartbeat_marker()
    }

    /// Re-key the room: broadcast `marker` from now on and evict members that
    /// keep sending anything else.
    pub fn set_heartbeat_marker(&self, marker: impl Into<Vec<u8>>) {
        self.tracker.set_heartbeat_marker(marker.into());
    }

    /// Subscribe to membership and message events.
    ///
    /// Callbacks run on the room's dispatcher task, in the order the
    /// underlying state changes happened.
    pub fn subscribe(
        &self,
        callback: impl Fn(&RoomEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.events.subscribe(callback)
    }

    /// Number of live event subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.events.subscriber_count()
    }

    /// Broadcast a message to all other peers in the room.
    ///
    /// The payload is sent as-is, even if it equals the heartbeat marker.
    pub async fn publish(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        if self.is_disposed() {
            return Err(RoomError::Disposed);
        }
        self.transport
            .publish(&self.topic, payload.into(), &self.cancel)
            .await?;
        Ok(())
    }

    /// Broadcast one heartbeat now. Does nothing while heartbeats are disabled.
    ///
    /// Cancellation by a concurrent `dispose` is not an error.
    pub async fn broadcast_heartbeat(&self) -> Result<()> {
        match self.heartbeat.broadcast().await {
            Err(e) if !e.is_cancelled() => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Evict expired or outdated peers now, returning them.
    pub fn prune_stale_peers(&self) -> Vec<Peer> {
        self.tracker.prune(Instant::now())
    }

    /// Resolves once the room is disposed.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Leave the room: stop heartbeats, cancel the subscription and ignore
    /// any message still in flight. Idempotent.
    pub fn dispose(&self) {
        self.heartbeat_enabled.store(false, Ordering::Release);
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.cancel.cancel();
        self.heartbeat.stop();
        info!("Left room {} as {}", self.topic, self.local_peer.id.short());
    }
}

impl Drop for PeerRoom {
    fn drop(&mut self) {
        if !self.is_disposed() {
            debug!("Room {} dropped without dispose", self.topic);
        }
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PeerId;
    use crate::loopback::LoopbackPubSub;
    use std::time::Duration;

    fn peer(name: &str) -> Peer {
        Peer::new(PeerId::from_public_key(name.as_bytes()))
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let local = peer("local");
        let result = PeerRoom::join(
            local.clone(),
            LoopbackPubSub::new(local),
            RoomConfig::new(""),
        )
        .await;
        assert!(matches!(
            result,
            Err(RoomError::InvalidConfig(ConfigError::EmptyTopic))
        ));
    }

    #[tokio::test]
    async fn test_broadcast_heartbeat_reaches_subscribers() {
        let local = peer("local");
        let loopback = LoopbackPubSub::new(local.clone());
        let room = PeerRoom::join(
            local,
            loopback.clone(),
            RoomConfig::new("test").with_heartbeat_interval(Duration::from_secs(3600)),
        )
        .await
        .unwrap();

        let received = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&received);
        loopback
            .subscribe(
                room.topic(),
                Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        room.broadcast_heartbeat().await.unwrap();
        assert_eq!(received.load(Ordering::SeqCst), 1);

        room.set_heartbeat_enabled(false);
        room.broadcast_heartbeat().await.unwrap();
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_publish_surfaces_transport_errors() {
        let local = peer("local");
        let loopback = LoopbackPubSub::new(local.clone());
        let room = PeerRoom::join_with_defaults(local, loopback.clone(), "test")
            .await
            .unwrap();

        loopback.disconnect();

        assert!(matches!(
            room.publish("hello").await,
            Err(RoomError::Transport(TransportError::Disconnected))
        ));
        assert!(matches!(
            room.broadcast_heartbeat().await,
            Err(RoomError::Transport(TransportError::Disconnected))
        ));
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let local = peer("local");
        let room = PeerRoom::join_with_defaults(local.clone(), LoopbackPubSub::new(local), "test")
            .await
            .unwrap();

        room.dispose();
        room.dispose();

        assert!(room.is_disposed());
        assert!(!room.heartbeat_enabled());
        assert!(matches!(room.publish("x").await, Err(RoomError::Disposed)));
        assert!(room.broadcast_heartbeat().await.is_ok());
        room.closed().await;
    }
}
