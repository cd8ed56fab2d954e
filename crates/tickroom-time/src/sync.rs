//! Clock sync - server time estimation from round-trip probes
//!
//! Every probe measures one round trip. Assuming symmetric latency, the
//! server's reply was produced at the local midpoint of the probe, which
//! gives an offset between the two clocks. The smaller the round trip,
//! the tighter that assumption, so only a strictly faster probe may
//! replace the adopted offset.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use tickroom_core::{Millis, TickroomError, TickroomResult};

/// Callback fired once, when the first probe completes
pub type SyncListener = Box<dyn FnOnce() + Send>;

/// Clock sync configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ClockSyncConfig {
    /// Period between probes, independent of replies in flight
    #[serde(with = "millis")]
    pub probe_interval: Duration,
}

impl Default for ClockSyncConfig {
    fn default() -> Self {
        ClockSyncConfig {
            probe_interval: Duration::from_millis(2000),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Result of evaluating one probe reply
#[must_use = "listeners due on first sync only run through notify()"]
pub struct ProbeSample {
    /// Measured round trip
    pub round_trip: Millis,
    /// Whether the sample replaced the adopted offset
    pub adopted: bool,
    first_sync: bool,
    listeners: Vec<SyncListener>,
}

impl ProbeSample {
    /// True if this sample moved the estimator from unsynced to synced
    pub fn is_first_sync(&self) -> bool {
        self.first_sync
    }

    /// Run the listeners that were waiting for the first sync
    pub fn notify(self) {
        for listener in self.listeners {
            listener();
        }
    }
}

impl fmt::Debug for ProbeSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeSample")
            .field("round_trip", &self.round_trip)
            .field("adopted", &self.adopted)
            .field("first_sync", &self.first_sync)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Minimum-RTT clock offset estimator
///
/// INVARIANT: `best_round_trip` never increases, and `offset` changes
/// only together with it.
#[derive(Default)]
pub struct ClockSync {
    /// Milliseconds to add to local time to get server time
    offset: Option<Millis>,
    /// Smallest round trip observed so far
    best_round_trip: Option<Millis>,
    /// Most recent round trip, adopted or not
    last_round_trip: Option<Millis>,
    /// Local time the latest probe was sent
    probe_sent_at: Millis,
    /// Waiting for the first completed probe
    listeners: Vec<SyncListener>,
}

impl ClockSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a probe is leaving now
    ///
    /// A reply to an older probe is measured against this send time.
    pub fn begin_probe(&mut self, now: Millis) {
        self.probe_sent_at = now;
    }

    /// Evaluate a server time reply received at local time `now`
    pub fn record_reply(&mut self, server_time: Millis, now: Millis) -> ProbeSample {
        let was_synced = self.is_synced();
        let round_trip = now - self.probe_sent_at;
        self.last_round_trip = Some(round_trip);

        let adopted = self.best_round_trip.map_or(true, |best| round_trip < best);
        if adopted {
            let local_midpoint = (self.probe_sent_at + now).div_euclid(2);
            let offset = server_time - local_midpoint;
            self.offset = Some(offset);
            self.best_round_trip = Some(round_trip);
            tracing::debug!(rtt_ms = round_trip, offset_ms = offset, "clock offset adopted");
        } else {
            tracing::trace!(rtt_ms = round_trip, "clock sample discarded");
        }

        let first_sync = !was_synced && self.is_synced();
        let listeners = if first_sync {
            std::mem::take(&mut self.listeners)
        } else {
            Vec::new()
        };

        ProbeSample {
            round_trip,
            adopted,
            first_sync,
            listeners,
        }
    }

    /// Whether at least one probe has completed
    pub fn is_synced(&self) -> bool {
        self.offset.is_some()
    }

    /// Current offset estimate
    pub fn offset(&self) -> Option<Millis> {
        self.offset
    }

    /// Smallest round trip observed so far
    pub fn best_round_trip(&self) -> Option<Millis> {
        self.best_round_trip
    }

    /// Most recent round trip, whether or not it was adopted
    pub fn estimated_ping(&self) -> Option<Millis> {
        self.last_round_trip
    }

    /// Server time corresponding to local time `now`
    pub fn server_time(&self, now: Millis) -> TickroomResult<Millis> {
        self.offset
            .map(|offset| now + offset)
            .ok_or(TickroomError::NotSynced)
    }

    /// Run `listener` once synced; immediately if already synced
    pub fn on_sync(&mut self, listener: SyncListener) {
        if self.is_synced() {
            listener();
        } else {
            self.listeners.push(listener);
        }
    }
}

impl fmt::Debug for ClockSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockSync")
            .field("offset", &self.offset)
            .field("best_round_trip", &self.best_round_trip)
            .field("last_round_trip", &self.last_round_trip)
            .field("probe_sent_at", &self.probe_sent_at)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
