//! Room configuration.

use std::time::Duration;

use roomsync_tick::TickConfig;
use serde::{Deserialize, Serialize};

/// Configuration for a room instance.
///
/// Every field has a default, so a config file only needs the fields it
/// changes. Durations are written as integer milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// State synchronizer interval.
    #[serde(with = "duration_ms")]
    pub patch_interval: Duration,

    /// Simulation interval. Independent of `patch_interval`.
    #[serde(with = "duration_ms")]
    pub simulation_interval: Duration,

    /// How long a session that dropped without leaving may resume.
    #[serde(with = "duration_ms")]
    pub reconnect_grace: Duration,

    /// Random delay (upper bound) before the first tick of each loop.
    #[serde(with = "duration_ms")]
    pub tick_jitter: Duration,

    /// Enemies spawned when the room starts.
    pub initial_enemies: usize,

    /// Capacity of the room's command channel.
    pub command_buffer: usize,

    /// Seed for the room's random generator (enemy placement, power, reply
    /// numbers). `None` seeds from the OS.
    pub rng_seed: Option<u64>,

    /// Free-form metadata reported in [`RoomInfo`](crate::RoomInfo).
    pub metadata: serde_json::Value,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            patch_interval: Duration::from_millis(50),
            simulation_interval: Duration::from_millis(16),
            reconnect_grace: Duration::from_secs(10),
            tick_jitter: Duration::from_millis(2),
            initial_enemies: 4,
            command_buffer: 64,
            rng_seed: None,
            metadata: serde_json::json!({ "str": "hello", "number": 10 }),
        }
    }
}

impl RoomConfig {
    pub(crate) fn patch_tick(&self) -> TickConfig {
        TickConfig::every(self.patch_interval).with_jitter(self.tick_jitter)
    }

    pub(crate) fn simulation_tick(&self) -> TickConfig {
        TickConfig::every(self.simulation_interval).with_jitter(self.tick_jitter)
    }
}

/// Serde adapter: [`Duration`] as integer milliseconds.
///
/// Use with `#[serde(with = "roomsync_room::duration_ms")]`.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_config_defaults() {
        let config = RoomConfig::default();
        assert_eq!(config.patch_interval, Duration::from_millis(50));
        assert_eq!(config.reconnect_grace, Duration::from_secs(10));
        assert_eq!(config.initial_enemies, 4);
        assert_eq!(config.metadata["str"], "hello");
        assert_eq!(config.metadata["number"], 10);
    }

    #[test]
    fn test_room_config_partial_json_keeps_defaults() {
        let config: RoomConfig =
            serde_json::from_str(r#"{"patch_interval": 100, "rng_seed": 9}"#).unwrap();

        assert_eq!(config.patch_interval, Duration::from_millis(100));
        assert_eq!(config.rng_seed, Some(9));
        assert_eq!(config.simulation_interval, Duration::from_millis(16));
    }

    #[test]
    fn test_room_config_durations_serialize_as_millis() {
        let json = serde_json::to_value(RoomConfig::default()).unwrap();
        assert_eq!(json["reconnect_grace"], 10_000);
        assert_eq!(json["patch_interval"], 50);
    }
}
