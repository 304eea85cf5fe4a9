//! Membership tracking for a room.
//!
//! `MembershipTracker` is the single authority over who is in the room. It:
//! - Classifies inbound messages as heartbeats or application traffic
//! - Keeps one `PresenceRecord` per remote peer and the ordered connected set
//! - Evicts peers whose heartbeat expired or no longer matches the room marker
//!
//! The presence table, the connected set and the expected marker live behind
//! one mutex. Events are queued while that mutex is held, so a peer's join is
//! always delivered before its messages, and its eviction after the heartbeat
//! that last kept it.

use crate::PeerId;
use crate::events::RoomEvent;
use crate::transport::{InboundMessage, Peer};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Bookkeeping for one remote peer.
#[derive(Debug, Clone)]
pub struct PresenceRecord {
    /// The peer as last seen on the wire
    pub peer: Peer,
    /// When the last matching heartbeat arrived
    pub last_seen: Instant,
    /// Payload of the last heartbeat
    pub last_marker: Vec<u8>,
}

#[derive(Debug, Default)]
struct PresenceState {
    records: HashMap<PeerId, PresenceRecord>,
    /// Projection of `records` keys, in join order
    connected: Vec<Peer>,
    /// Heartbeat payload currently expected from members
    marker: Vec<u8>,
}

/// Tracks the presence of remote peers in a room.
///
/// Safe to call concurrently from transport delivery threads and the
/// heartbeat timer.
pub struct MembershipTracker {
    local_peer: Peer,
    expiration: Duration,
    heartbeat_enabled: Arc<AtomicBool>,
    cancel: CancellationToken,
    state: Mutex<PresenceState>,
    events: mpsc::UnboundedSender<RoomEvent>,
}

impl MembershipTracker {
    /// Create a tracker.
    ///
    /// `heartbeat_enabled` is shared with the owner so it can be toggled
    /// without taking the state lock. Once `cancel` fires, inbound messages
    /// are ignored.
    pub fn new(
        local_peer: Peer,
        marker: Vec<u8>,
        expiration: Duration,
        heartbeat_enabled: Arc<AtomicBool>,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<RoomEvent>,
    ) -> Self {
        Self {
            local_peer,
            expiration,
            heartbeat_enabled,
            cancel,
            state: Mutex::new(PresenceState {
                marker,
                ..Default::default()
            }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PresenceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: RoomEvent) {
        // The receiver is gone only after the room shut down.
        let _ = self.events.send(event);
    }

    /// Classify and apply one inbound message.
    pub fn on_message(&self, msg: InboundMessage) {
        if msg.sender.id == self.local_peer.id {
            return;
        }

        if self.cancel.is_cancelled() {
            return;
        }

        let mut state = self.lock();

        // With heartbeats disabled the marker is ordinary traffic
        if msg.payload == state.marker && self.heartbeat_enabled.load(Ordering::Acquire) {
            let peer_id = msg.sender.id;
            let record = PresenceRecord {
                peer: msg.sender,
                last_seen: Instant::now(),
                last_marker: msg.payload,
            };

            if state.records.insert(peer_id, record.clone()).is_none() {
                state.connected.push(record.peer.clone());
                info!("Peer joined: {}", peer_id.short());
                self.emit(RoomEvent::joined(record.peer));
            } else {
                trace!("Heartbeat from {}", peer_id.short());
            }
        } else if state.connected.iter().any(|p| p.id == msg.sender.id) {
            trace!(
                "Message from {} ({} bytes)",
                msg.sender.id.short(),
                msg.payload.len()
            );
            self.emit(RoomEvent::message(msg));
        } else {
            trace!(
                "Dropping message from unknown peer {}",
                msg.sender.id.short()
            );
        }
    }

    /// Evict peers whose heartbeat expired or carries an outdated marker.
    ///
    /// Returns the evicted peers.
    pub fn prune(&self, now: Instant) -> Vec<Peer> {
        let mut state = self.lock();
        let PresenceState {
            records,
            connected,
            marker,
        } = &mut *state;

        let stale: Vec<PeerId> = records
            .iter()
            .filter(|(_, record)| {
                let expired = now.saturating_duration_since(record.last_seen) > self.expiration;
                let outdated = record.last_marker != *marker;
                expired || outdated
            })
            .map(|(id, _)| *id)
            .collect();

        if stale.is_empty() {
            return Vec::new();
        }

        let mut removed = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(record) = records.remove(&id) {
                connected.retain(|p| p.id != id);
                info!("Peer left: {}", id.short());
                removed.push(record.peer);
            }
        }

        debug!("Pruned {} stale peer(s)", removed.len());
        self.emit(RoomEvent::left(removed.clone()));
        removed
    }

    /// Consistent copy of the connected peers, in join order.
    pub fn connected_peers(&self) -> Vec<Peer> {
        self.lock().connected.clone()
    }

    /// Whether `peer_id` is currently connected.
    pub fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.lock().records.contains_key(peer_id)
    }

    /// Presence record for `peer_id`, if connected.
    pub fn record(&self, peer_id: &PeerId) -> Option<PresenceRecord> {
        self.lock().records.get(peer_id).cloned()
    }

    /// When the last matching heartbeat from `peer_id` arrived, if connected.
    pub fn last_seen(&self, peer_id: &PeerId) -> Option<Instant> {
        self.lock().records.get(peer_id).map(|r| r.last_seen)
    }

    /// Heartbeat payload currently expected (and broadcast).
    pub fn heartbeat_marker(&self) -> Vec<u8> {
        self.lock().marker.clone()
    }

    /// Replace the expected heartbeat payload.
    ///
    /// Members still sending the previous marker are evicted on the next prune.
    pub fn set_heartbeat_marker(&self, marker: Vec<u8>) {
        self.lock().marker = marker;
    }

    pub fn local_peer(&self) -> &Peer {
        &self.local_peer
    }
}
