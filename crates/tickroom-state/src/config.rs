//! Room engine configuration

use serde::Deserialize;
use tickroom_core::{Millis, TickRate};

/// Per-room engine configuration
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Simulation ticks per second
    pub tick_rate: TickRate,
    /// How far (ms) a client may claim a post predates its server receipt
    pub tolerance_ms: Millis,
    /// Memoize states; disabling replays from the initial tick on every query
    pub cache_enabled: bool,
    /// Ticks between memoized snapshots
    pub snapshot_stride: u32,
    /// Maximum retained snapshots
    pub snapshot_count: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        RoomConfig {
            tick_rate: TickRate::default(),
            tolerance_ms: 300,
            cache_enabled: true,
            snapshot_stride: 8,
            snapshot_count: 256,
        }
    }
}

impl RoomConfig {
    pub fn new(tick_rate: u32, tolerance_ms: Millis) -> Self {
        RoomConfig {
            tick_rate: TickRate::new(tick_rate),
            tolerance_ms,
            ..Self::default()
        }
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_snapshot_stride(mut self, stride: u32) -> Self {
        self.snapshot_stride = stride;
        self
    }

    pub fn with_snapshot_count(mut self, count: usize) -> Self {
        self.snapshot_count = count;
        self
    }

    /// Clamp every field into its valid range
    pub fn normalized(mut self) -> Self {
        self.tick_rate = TickRate::new(self.tick_rate.per_second());
        self.snapshot_stride = self.snapshot_stride.max(1);
        self.snapshot_count = self.snapshot_count.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RoomConfig::new(10, 200);
        assert_eq!(config.tick_rate.per_second(), 10);
        assert_eq!(config.tolerance_ms, 200);
        assert!(config.cache_enabled);
        assert_eq!(config.snapshot_stride, 8);
        assert_eq!(config.snapshot_count, 256);
    }

    #[test]
    fn test_normalized_floors_to_one() {
        let config = RoomConfig::new(10, 200)
            .with_snapshot_stride(0)
            .with_snapshot_count(0)
            .normalized();
        assert_eq!(config.snapshot_stride, 1);
        assert_eq!(config.snapshot_count, 1);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: RoomConfig =
            serde_json::from_str(r#"{"tick_rate": 30, "tolerance_ms": 150, "snapshot_count": 4}"#)
                .unwrap();
        assert_eq!(config.tick_rate.per_second(), 30);
        assert_eq!(config.tolerance_ms, 150);
        assert_eq!(config.snapshot_count, 4);
        assert_eq!(config.snapshot_stride, 8);
        assert!(config.cache_enabled);
    }
}
