//! Simulation settings.
//!
//! Room settings can come from a JSON file (the serialized form of
//! `RoomConfig`); command-line flags are applied on top.

use anyhow::Result;
use peer_room::RoomConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Topic used when neither the file nor the command line names one.
pub const DEFAULT_TOPIC: &str = "peer-room-sim";

/// Everything needed to run a simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimSettings {
    /// Number of simulated peers
    pub peers: usize,
    /// Configuration shared by every room
    pub room: RoomConfig,
    /// Shared password; wraps every endpoint in the encrypted transport
    pub password: Option<String>,
    /// When to make the last peer leave, if at all
    pub churn_after: Option<Duration>,
    /// How long to run; `None` runs until interrupted
    pub duration: Option<Duration>,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            peers: 3,
            room: RoomConfig::new(DEFAULT_TOPIC),
            password: None,
            churn_after: None,
            duration: None,
        }
    }
}

impl SimSettings {
    /// Defaults, with room settings loaded from `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let room = match path {
            Some(path) => load_room_config(path)?,
            None => RoomConfig::new(DEFAULT_TOPIC),
        };
        Ok(Self {
            room,
            ..Default::default()
        })
    }

    /// Check the settings can drive a simulation.
    pub fn validate(&self) -> Result<()> {
        if self.peers == 0 {
            anyhow::bail!("At least one peer is required");
        }
        self.room.validate()?;
        Ok(())
    }
}

/// Read a `RoomConfig` from a JSON file.
pub fn load_room_config(path: &Path) -> Result<RoomConfig> {
    let contents = fs::read_to_string(path)?;
    let config: RoomConfig = serde_json::from_str(&contents)?;
    Ok(config)
}

/// Write a `RoomConfig` as pretty JSON, creating parent directories.
pub fn save_room_config(path: &Path, config: &RoomConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let contents = serde_json::to_string_pretty(config)?;
    fs::write(path, contents)?;
    Ok(())
}

/// Final view of one simulated peer, as printed with `--json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MembershipSnapshot {
    /// The peer this view belongs to
    pub peer_id: String,
    /// Whether the peer was still heartbeating
    pub heartbeat_enabled: bool,
    /// Peers it considered present, in join order
    pub connected: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_room_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("room.json");
        let config = RoomConfig::new("lobby")
            .with_heartbeat_interval(Duration::from_millis(100))
            .with_heartbeat_marker("lobby-v1");

        save_room_config(&path, &config).unwrap();
        let loaded = load_room_config(&path).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("room.json");
        fs::write(&path, r#"{"topic":"lobby","heartbeatExpirationMs":5000}"#).unwrap();

        let settings = SimSettings::load(Some(&path)).unwrap();

        assert_eq!(settings.room.topic, "lobby");
        assert_eq!(settings.room.heartbeat_expiration, Duration::from_secs(5));
        assert_eq!(settings.room.heartbeat_interval, Duration::from_millis(500));
        assert_eq!(settings.peers, 3);
    }

    #[test]
    fn test_missing_or_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(SimSettings::load(Some(&dir.path().join("absent.json"))).is_err());

        let path = dir.path().join("bad.json");
        fs::write(&path, "not json").unwrap();
        assert!(SimSettings::load(Some(&path)).is_err());
    }

    #[test]
    fn test_validate() {
        assert!(SimSettings::default().validate().is_ok());

        let no_peers = SimSettings {
            peers: 0,
            ..Default::default()
        };
        assert!(no_peers.validate().is_err());

        let mut bad_room = SimSettings::default();
        bad_room.room.topic.clear();
        assert!(bad_room.validate().is_err());
    }
}
