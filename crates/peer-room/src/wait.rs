//! One-shot helpers built on room events.
//!
//! Each helper holds a room subscription only for as long as it waits; the
//! subscription is dropped on success, cancellation and room shutdown alike.

use crate::events::{RoomEvent, Subscription};
use crate::room::PeerRoom;
use crate::transport::{InboundMessage, Peer};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("Wait cancelled")]
    Cancelled,

    #[error("Room closed while waiting")]
    RoomClosed,
}

pub type Result<T> = std::result::Result<T, WaitError>;

/// Subscribe and resolve with the first value `matcher` extracts from an event.
fn first_match<T: Send + 'static>(
    room: &PeerRoom,
    matcher: impl Fn(&RoomEvent) -> Option<T> + Send + Sync + 'static,
) -> (Subscription, oneshot::Receiver<T>) {
    let (tx, rx) = oneshot::channel();
    let tx = Mutex::new(Some(tx));
    let subscription = room.subscribe(move |event| {
        if let Some(value) = matcher(event) {
            if let Some(tx) = tx.lock().unwrap_or_else(|e| e.into_inner()).take() {
                let _ = tx.send(value);
            }
        }
    });
    (subscription, rx)
}

async fn settle<T>(
    room: &PeerRoom,
    rx: oneshot::Receiver<T>,
    cancel: &CancellationToken,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(WaitError::Cancelled),
        value = rx => value.map_err(|_| WaitError::RoomClosed),
        _ = room.closed() => Err(WaitError::RoomClosed),
    }
}

/// Wait until `peer` is in the room. Resolves at once if it already is.
pub async fn wait_for_peer(
    room: &PeerRoom,
    peer: &Peer,
    cancel: &CancellationToken,
) -> Result<Peer> {
    let target = peer.clone();
    let (_subscription, rx) = first_match(room, move |event| match event {
        RoomEvent::MembershipChanged { added, .. } => {
            added.iter().find(|p| **p == target).cloned()
        }
        _ => None,
    });

    // Checked after subscribing so a join in between is not missed
    if let Some(present) = room.connected_peers().into_iter().find(|p| p == peer) {
        return Ok(present);
    }
    settle(room, rx, cancel).await
}

/// Wait for the next peer to join.
pub async fn wait_for_any_peer(room: &PeerRoom, cancel: &CancellationToken) -> Result<Peer> {
    let (_subscription, rx) = first_match(room, |event| match event {
        RoomEvent::MembershipChanged { added, .. } => added.first().cloned(),
        _ => None,
    });
    settle(room, rx, cancel).await
}

/// Wait for an application message whose payload equals `expected`.
pub async fn wait_for_message(
    room: &PeerRoom,
    expected: &[u8],
    cancel: &CancellationToken,
) -> Result<InboundMessage> {
    let (_subscription, rx) = first_match(room, message_matcher(expected.to_vec()));
    settle(room, rx, cancel).await
}

/// Publish `payload` every `interval` until a message equal to `expected`
/// arrives, returning that message.
///
/// The first publish happens immediately. Failed publishes are logged and
/// retried on the next interval.
pub async fn publish_until_acknowledged(
    room: &PeerRoom,
    payload: &[u8],
    expected: &[u8],
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<InboundMessage> {
    let (_subscription, mut rx) = first_match(room, message_matcher(expected.to_vec()));

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WaitError::Cancelled),
            ack = &mut rx => return ack.map_err(|_| WaitError::RoomClosed),
            _ = room.closed() => return Err(WaitError::RoomClosed),
            _ = ticker.tick() => {
                if let Err(e) = room.publish(payload).await {
                    debug!("Publish on {} failed, retrying: {}", room.topic(), e);
                }
            }
        }
    }
}

fn message_matcher(
    expected: Vec<u8>,
) -> impl Fn(&RoomEvent) -> Option<InboundMessage> + Send + Sync {
    move |event| match event {
        RoomEvent::MessageReceived(msg) if msg.payload == expected => Some(msg.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoomConfig;
    use crate::loopback::LoopbackPubSub;
    use crate::PeerId;

    fn peer(name: &str) -> Peer {
        Peer::new(PeerId::from_public_key(name.as_bytes()))
    }

    async fn linked_rooms() -> (PeerRoom, PeerRoom) {
        let (a, b) = (peer("a"), peer("b"));
        let la = LoopbackPubSub::new(a.clone());
        let lb = LoopbackPubSub::new(b.clone());
        la.link(&lb);
        let config = RoomConfig::new("wait")
            .with_heartbeat_interval(Duration::from_millis(10))
            .with_heartbeat_expiration(Duration::from_secs(1));
        let room_a = PeerRoom::join(a, la, config.clone()).await.unwrap();
        let room_b = PeerRoom::join(b, lb, config).await.unwrap();
        (room_a, room_b)
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_peer_resolves_on_join_and_when_present() {
        let (room_a, room_b) = linked_rooms().await;
        let cancel = CancellationToken::new();

        let found = wait_for_peer(&room_a, room_b.local_peer(), &cancel)
            .await
            .unwrap();
        assert_eq!(&found, room_b.local_peer());
        assert_eq!(room_a.subscriber_count(), 0);

        // Already present
        let again = wait_for_peer(&room_a, room_b.local_peer(), &cancel)
            .await
            .unwrap();
        assert_eq!(&again, room_b.local_peer());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_detaches_subscription() {
        let local = peer("alone");
        let room = PeerRoom::join_with_defaults(local.clone(), LoopbackPubSub::new(local), "wait")
            .await
            .unwrap();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        assert_eq!(
            wait_for_any_peer(&room, &cancel).await,
            Err(WaitError::Cancelled)
        );
        assert_eq!(room.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_ends_wait() {
        let local = peer("alone");
        let room = PeerRoom::join_with_defaults(local.clone(), LoopbackPubSub::new(local), "wait")
            .await
            .unwrap();
        room.dispose();

        assert_eq!(
            wait_for_message(&room, b"never", &CancellationToken::new()).await,
            Err(WaitError::RoomClosed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_until_acknowledged() {
        let (room_a, room_b) = linked_rooms().await;
        let cancel = CancellationToken::new();
        wait_for_peer(&room_a, room_b.local_peer(), &cancel)
            .await
            .unwrap();
        wait_for_peer(&room_b, room_a.local_peer(), &cancel)
            .await
            .unwrap();

        let responder = {
            let cancel = cancel.clone();
            async move {
                wait_for_message(&room_b, b"ping", &cancel).await.unwrap();
                room_b.publish("pong").await.unwrap();
                room_b
            }
        };

        let (ack, _room_b) = tokio::join!(
            publish_until_acknowledged(
                &room_a,
                b"ping",
                b"pong",
                Duration::from_millis(50),
                &cancel
            ),
            responder
        );

        let ack = ack.unwrap();
        assert_eq!(ack.payload, b"pong");
        assert_eq!(ack.sender, peer("b"));
        assert_eq!(room_a.subscriber_count(), 0);
    }
}
