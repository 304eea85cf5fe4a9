//! PeerId: Opaque identifier for a participant in a room.
//!
//! Wraps a 32-byte digest (BLAKE3 hash of the peer's public key, or random
//! bytes) but displays as a 64-character hex string for human readability.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Length of a peer ID digest in bytes.
pub const PEER_ID_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum PeerIdError {
    #[error("Invalid peer ID format: expected {} hex chars", PEER_ID_LEN * 2)]
    InvalidFormat,
    #[error("Invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// A unique identifier for a peer in a room.
///
/// Two peers are the same participant iff their IDs are equal; address
/// information never takes part in the comparison.
///
/// # Examples
/// ```
/// use peer_room::PeerId;
///
/// let peer_id = PeerId::from_public_key(b"my public key");
/// let parsed: PeerId = peer_id.to_string().parse().unwrap();
/// assert_eq!(peer_id, parsed);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; PEER_ID_LEN]);

impl PeerId {
    /// Generate a new random peer ID.
    pub fn generate() -> Self {
        use rand::Rng;
        let mut bytes = [0u8; PEER_ID_LEN];
        rand::rng().fill(&mut bytes);
        Self(bytes)
    }

    /// Derive a peer ID from a public key (content hash of the key).
    pub fn from_public_key(key: &[u8]) -> Self {
        Self(*blake3::hash(key).as_bytes())
    }

    /// Get the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; PEER_ID_LEN] {
        &self.0
    }

    /// Short form for log lines (first 8 hex chars).
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.short())
    }
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != PEER_ID_LEN * 2 {
            return Err(PeerIdError::InvalidFormat);
        }

        let mut bytes = [0u8; PEER_ID_LEN];
        hex::decode_to_slice(s.to_ascii_lowercase(), &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl From<[u8; PEER_ID_LEN]> for PeerId {
    fn from(bytes: [u8; PEER_ID_LEN]) -> Self {
        Self(bytes)
    }
}

// Serialize as hex string for consistency in logs, errors, JSON
impl serde::Serialize for PeerId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for PeerId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
