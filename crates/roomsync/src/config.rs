//! Server configuration.

use std::path::Path;
use std::time::Duration;

use roomsync_room::{RoomConfig, duration_ms};
use serde::{Deserialize, Serialize};

use crate::RoomsyncError;

/// Everything the server needs to start: where to listen, how the room
/// behaves, and the per-connection timeouts.
///
/// Loaded from JSON; missing fields take their defaults.
///
/// ```rust
/// use std::time::Duration;
/// use roomsync::ServerConfig;
///
/// let config = ServerConfig::from_json(r#"{
///     "bind_addr": "0.0.0.0:2567",
///     "room": { "reconnect_grace": 20000 }
/// }"#).unwrap();
///
/// assert_eq!(config.room.reconnect_grace, Duration::from_secs(20));
/// assert_eq!(config.room.patch_interval, Duration::from_millis(50));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,

    pub room: RoomConfig,

    /// How long a new connection has to send `Hello` or `Resume`.
    #[serde(with = "duration_ms")]
    pub handshake_timeout: Duration,

    /// A connection that sends nothing (heartbeats included) for this long
    /// is treated as dropped, which starts the reconnect grace period.
    #[serde(with = "duration_ms")]
    pub idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:2567".into(),
            room: RoomConfig::default(),
            handshake_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(15),
        }
    }
}

impl ServerConfig {
    pub fn from_json(json: &str) -> Result<Self, RoomsyncError> {
        serde_json::from_str(json).map_err(RoomsyncError::Config)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RoomsyncError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}
