//! Room configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Heartbeat payload understood by every room that has not been re-keyed.
pub const DEFAULT_HEARTBEAT_MARKER: &[u8] = b"KuboPeerRoomHeartbeat";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Topic cannot be empty")]
    EmptyTopic,
    #[error("Heartbeat marker cannot be empty")]
    EmptyMarker,
    #[error("Heartbeat interval must be greater than zero")]
    ZeroInterval,
    #[error("Heartbeat expiration must be greater than zero")]
    ZeroExpiration,
}

/// Configuration for a room.
///
/// Serialized with durations in milliseconds and the marker as text so it can
/// live in a JSON file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomConfig {
    /// Topic (channel) name shared by every member of the room
    pub topic: String,
    /// How often this peer broadcasts a heartbeat (default: 500ms)
    #[serde(rename = "heartbeatIntervalMs", with = "duration_ms", default = "default_interval")]
    pub heartbeat_interval: Duration,
    /// How long a peer may stay silent before it is evicted (default: 2s)
    #[serde(rename = "heartbeatExpirationMs", with = "duration_ms", default = "default_expiration")]
    pub heartbeat_expiration: Duration,
    /// Payload that marks a message as a heartbeat
    #[serde(with = "marker_text", default = "default_marker")]
    pub heartbeat_marker: Vec<u8>,
    /// Whether this peer broadcasts (and tracks) heartbeats
    #[serde(default = "default_enabled")]
    pub heartbeat_enabled: bool,
}

fn default_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_expiration() -> Duration {
    Duration::from_millis(2000)
}

fn default_marker() -> Vec<u8> {
    DEFAULT_HEARTBEAT_MARKER.to_vec()
}

fn default_enabled() -> bool {
    true
}

impl RoomConfig {
    /// Create a configuration for `topic` with default heartbeat settings.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            heartbeat_interval: default_interval(),
            heartbeat_expiration: default_expiration(),
            heartbeat_marker: default_marker(),
            heartbeat_enabled: default_enabled(),
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_heartbeat_expiration(mut self, expiration: Duration) -> Self {
        self.heartbeat_expiration = expiration;
        self
    }

    pub fn with_heartbeat_marker(mut self, marker: impl Into<Vec<u8>>) -> Self {
        self.heartbeat_marker = marker.into();
        self
    }

    pub fn with_heartbeat_enabled(mut self, enabled: bool) -> Self {
        self.heartbeat_enabled = enabled;
        self
    }

    /// Check the configuration can drive a room.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.is_empty() {
            return Err(ConfigError::EmptyTopic);
        }
        if self.heartbeat_marker.is_empty() {
            return Err(ConfigError::EmptyMarker);
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if self.heartbeat_expiration.is_zero() {
            return Err(ConfigError::ZeroExpiration);
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod marker_text {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(marker: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&String::from_utf8_lossy(marker))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        String::deserialize(d).map(String::into_bytes)
    }
}
