//! In-process room simulation.
//!
//! Starts a set of peers on a fully meshed loopback network, each joined to
//! the same room, and logs what every peer observes.

use crate::settings::{MembershipSnapshot, SimSettings};
use anyhow::Result;
use futures::future::try_join_all;
use peer_room::{EncryptedPubSub, LoopbackPubSub, Peer, PeerId, PeerRoom, RoomEvent, Subscription};
use tracing::{debug, info};

/// One simulated peer.
pub struct SimNode {
    pub room: PeerRoom,
    pub loopback: LoopbackPubSub,
    _events: Subscription,
}

impl SimNode {
    async fn join(settings: &SimSettings, loopback: LoopbackPubSub) -> Result<Self> {
        let room = join_room(loopback.clone(), settings).await?;

        let me = room.local_peer().id.short();
        let events = room.subscribe(move |event| match event {
            RoomEvent::MembershipChanged { added, removed } => {
                for peer in added {
                    info!("[{}] sees {} join", me, peer.id.short());
                }
                for peer in removed {
                    info!("[{}] sees {} leave", me, peer.id.short());
                }
            }
            RoomEvent::MessageReceived(msg) => {
                debug!(
                    "[{}] message from {} ({} bytes)",
                    me,
                    msg.sender.id.short(),
                    msg.size
                );
            }
        });

        Ok(Self {
            room,
            loopback,
            _events: events,
        })
    }

    pub fn snapshot(&self) -> MembershipSnapshot {
        MembershipSnapshot {
            peer_id: self.room.local_peer().id.to_string(),
            heartbeat_enabled: self.room.heartbeat_enabled(),
            connected: self
                .room
                .connected_peers()
                .iter()
                .map(|p| p.id.to_string())
                .collect(),
        }
    }
}

async fn join_room(loopback: LoopbackPubSub, settings: &SimSettings) -> Result<PeerRoom> {
    let peer = loopback.peer().clone();
    let config = settings.room.clone();
    let room = match &settings.password {
        Some(password) => {
            let salt = config.topic.clone();
            let transport = EncryptedPubSub::new(loopback, password, Some(salt.as_str()))?;
            PeerRoom::join(peer, transport, config).await?
        }
        None => PeerRoom::join(peer, loopback, config).await?,
    };
    Ok(room)
}

/// A running simulation.
pub struct Simulation {
    nodes: Vec<SimNode>,
}

impl Simulation {
    /// Create the peers, mesh their endpoints and join every room.
    pub async fn start(settings: &SimSettings) -> Result<Self> {
        settings.validate()?;

        let endpoints: Vec<LoopbackPubSub> = (0..settings.peers)
            .map(|_| LoopbackPubSub::new(Peer::new(PeerId::generate())))
            .collect();
        LoopbackPubSub::mesh(&endpoints);

        let nodes = try_join_all(
            endpoints
                .into_iter()
                .map(|endpoint| SimNode::join(settings, endpoint)),
        )
        .await?;

        info!(
            "Started {} peer(s) on {}{}",
            nodes.len(),
            settings.room.topic,
            if settings.password.is_some() {
                " (encrypted)"
            } else {
                ""
            }
        );
        Ok(Self { nodes })
    }

    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    /// Peers still heartbeating.
    pub fn active_peers(&self) -> Vec<Peer> {
        self.nodes
            .iter()
            .filter(|n| n.room.heartbeat_enabled())
            .map(|n| n.room.local_peer().clone())
            .collect()
    }

    /// Whether every active peer sees exactly the other active peers.
    pub fn converged(&self) -> bool {
        let active = self.active_peers();
        self.nodes
            .iter()
            .filter(|n| n.room.heartbeat_enabled())
            .all(|n| {
                let connected = n.room.connected_peers();
                connected.len() == active.len() - 1
                    && active
                        .iter()
                        .filter(|p| *p != n.room.local_peer())
                        .all(|p| connected.contains(p))
            })
    }

    /// Make the last active peer leave: stop its heartbeat and cut its links.
    ///
    /// Returns the peer that left, if any was left to churn.
    pub fn churn(&self) -> Option<Peer> {
        let leaving = self.nodes.iter().rev().find(|n| n.room.heartbeat_enabled())?;

        leaving.room.set_heartbeat_enabled(false);
        for other in &self.nodes {
            leaving.loopback.unlink(&other.loopback);
        }

        let peer = leaving.room.local_peer().clone();
        info!("Peer {} left the network", peer.id.short());
        Some(peer)
    }

    /// Log what every peer currently sees.
    pub fn log_membership(&self) {
        for node in &self.nodes {
            let connected: Vec<String> = node
                .room
                .connected_peers()
                .iter()
                .map(|p| p.id.short())
                .collect();
            info!(
                "[{}] {} peer(s): {}",
                node.room.local_peer().id.short(),
                connected.len(),
                connected.join(", ")
            );
        }
    }

    pub fn snapshots(&self) -> Vec<MembershipSnapshot> {
        self.nodes.iter().map(SimNode::snapshot).collect()
    }

    /// Dispose every room.
    pub fn shutdown(&self) {
        for node in &self.nodes {
            node.room.dispose();
        }
        info!("Simulation stopped");
    }
}
