//! Time primitives for tickroom
//!
//! Wall-clock values are integer milliseconds on the server's clock.
//! The simulation advances in discrete ticks; a tick rate converts
//! between the two with floor semantics so that every client maps the
//! same timestamp to the same tick.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Discrete simulation step
pub type Tick = i64;

/// Milliseconds on the server's wall clock
pub type Millis = i64;

/// Ticks per second
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TickRate(u32);

impl TickRate {
    /// Create a tick rate; zero is raised to one tick per second
    #[inline]
    pub fn new(ticks_per_second: u32) -> Self {
        TickRate(ticks_per_second.max(1))
    }

    #[inline]
    pub fn per_second(self) -> u32 {
        self.0
    }

    /// Length of one tick in milliseconds
    #[inline]
    pub fn ms_per_tick(self) -> f64 {
        1000.0 / self.0 as f64
    }

    /// floor(ms * rate / 1000)
    #[inline]
    pub fn time_to_tick(self, ms: Millis) -> Tick {
        (ms * self.0 as i64).div_euclid(1000)
    }

    /// Smallest tick count that covers `ms`
    #[inline]
    pub fn ticks_ceil(self, ms: Millis) -> i64 {
        ceil_div(ms * self.0 as i64, 1000)
    }

    /// Smallest tick count that covers half of `ms`
    #[inline]
    pub fn half_ticks_ceil(self, ms: Millis) -> i64 {
        ceil_div(ms * self.0 as i64, 2000)
    }
}

impl Default for TickRate {
    fn default() -> Self {
        TickRate(20)
    }
}

impl fmt::Debug for TickRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz", self.0)
    }
}

#[inline]
fn ceil_div(a: i64, b: i64) -> i64 {
    -(-a).div_euclid(b)
}
