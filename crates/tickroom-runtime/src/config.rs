//! Client configuration

use std::time::Duration;

use serde::Deserialize;
use tickroom_time::ClockSyncConfig;

/// Shared client configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Clock probe schedule
    pub clock: ClockSyncConfig,
    /// Bound on queued outgoing and incoming messages per connection
    pub outgoing_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            clock: ClockSyncConfig::default(),
            outgoing_buffer: 1000,
        }
    }
}

impl ClientConfig {
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.clock.probe_interval = interval;
        self
    }

    pub fn with_outgoing_buffer(mut self, buffer: usize) -> Self {
        self.outgoing_buffer = buffer;
        self
    }
}
