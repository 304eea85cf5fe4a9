//! peer-room: presence-aware group messaging over a pub/sub topic.
//!
//! This crate provides:
//! - `PeerRoom`, a room facade that tracks which peers are present on a topic
//!   by exchanging heartbeats, and surfaces application messages from them
//! - The `PubSub` transport abstraction plus in-memory, filtering and
//!   password-encrypted implementations
//! - One-shot wait helpers built on room events

pub mod config;
pub mod encrypted;
pub mod events;
pub mod filter;
pub mod heartbeat;
pub mod loopback;
pub mod peer_id;
pub mod presence;
pub mod room;
pub mod transport;
pub mod wait;

pub use config::{ConfigError, DEFAULT_HEARTBEAT_MARKER, RoomConfig};
pub use encrypted::{EncryptedPubSub, EncryptionError};
pub use events::{EventBus, RoomEvent, Subscription};
pub use filter::PeerFilter;
pub use loopback::LoopbackPubSub;
pub use peer_id::{PeerId, PeerIdError};
pub use presence::{MembershipTracker, PresenceRecord};
pub use room::{PeerRoom, RoomError};
pub use transport::{InboundMessage, MessageHandler, Peer, PubSub, TransportError};
pub use wait::{
    WaitError, publish_until_acknowledged, wait_for_any_peer, wait_for_message, wait_for_peer,
};
