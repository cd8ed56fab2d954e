//! Local clock implementations

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tickroom_core::Millis;

/// Source of local wall-clock time in milliseconds
pub trait LocalClock: Send + Sync {
    fn now_ms(&self) -> Millis;
}

/// Operating system wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl LocalClock for SystemClock {
    fn now_ms(&self) -> Millis {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_millis() as Millis,
            // Clock set before 1970
            Err(err) => -(err.duration().as_millis() as Millis),
        }
    }
}

/// Manually driven clock for simulations and tests
///
/// Clones share the same time value.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    value: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: Millis) -> Self {
        ManualClock {
            value: Arc::new(AtomicI64::new(start)),
        }
    }

    /// Move the clock forward by `ms`
    pub fn advance(&self, ms: Millis) -> Millis {
        self.value.fetch_add(ms, Ordering::SeqCst) + ms
    }

    /// Jump to an absolute time
    pub fn set(&self, ms: Millis) {
        self.value.store(ms, Ordering::SeqCst);
    }
}

impl LocalClock for ManualClock {
    fn now_ms(&self) -> Millis {
        self.value.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_after_epoch() {
        assert!(SystemClock.now_ms() > 1_600_000_000_000);
    }

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new(1_000);
        let other = clock.clone();

        assert_eq!(clock.advance(250), 1_250);
        assert_eq!(other.now_ms(), 1_250);

        other.set(5);
        assert_eq!(clock.now_ms(), 5);
    }
}
