//! Snapshot cache - memoized states at a fixed tick stride
//!
//! `snapshots[i]` holds the state after applying every tick up to and
//! including `start_tick + i * stride`. A query replays at most one
//! stride of ticks on top of the nearest snapshot.
//!
//! A late post marks its tick dirty; the next `ensure` truncates every
//! snapshot taken at or after that tick. Once more than `capacity`
//! snapshots exist, the oldest are evicted and `start_tick` moves
//! forward. Nothing before `start_tick` can be replayed again.

use std::collections::VecDeque;

use tickroom_core::Tick;

/// Memoized states with dirty tracking and bounded retention
#[derive(Debug)]
pub struct SnapshotCache<S> {
    stride: i64,
    capacity: usize,
    snapshots: VecDeque<S>,
    /// Tick of `snapshots[0]`; never decreases once set
    start_tick: Option<Tick>,
    /// Earliest tick whose posts changed since the last `ensure`
    dirty_from: Option<Tick>,
}

impl<S: Clone> SnapshotCache<S> {
    /// Stride and capacity are raised to at least one
    pub fn new(stride: u32, capacity: usize) -> Self {
        SnapshotCache {
            stride: i64::from(stride.max(1)),
            capacity: capacity.max(1),
            snapshots: VecDeque::new(),
            start_tick: None,
            dirty_from: None,
        }
    }

    pub fn stride(&self) -> i64 {
        self.stride
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Retained snapshot count
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Tick of the oldest retained snapshot
    pub fn start_tick(&self) -> Option<Tick> {
        self.start_tick
    }

    pub fn dirty_from(&self) -> Option<Tick> {
        self.dirty_from
    }

    /// Whether `tick` precedes the retained window
    pub fn is_before_window(&self, tick: Tick) -> bool {
        self.start_tick.is_some_and(|start| tick < start)
    }

    /// Record that posts at `tick` changed
    ///
    /// Ticks before the window are ignored: they are already folded into
    /// the oldest snapshot.
    pub fn mark_dirty(&mut self, tick: Tick) {
        if self.is_before_window(tick) {
            return;
        }
        if self.dirty_from.map_or(true, |dirty| tick < dirty) {
            self.dirty_from = Some(tick);
        }
    }

    /// Bring snapshots up to date so `at_tick` can be answered
    ///
    /// `apply_tick` advances a state through one tick. Returns the new
    /// start tick when the window was established or moved forward, so
    /// the caller can forget posts before it.
    pub fn ensure<I, F>(
        &mut self,
        at_tick: Tick,
        initial_tick: Tick,
        initial_state: I,
        mut apply_tick: F,
    ) -> Option<Tick>
    where
        I: FnOnce() -> S,
        F: FnMut(S, Tick) -> S,
    {
        let mut moved = false;
        let start = match self.start_tick {
            Some(start) => start,
            None => {
                self.start_tick = Some(initial_tick);
                moved = true;
                initial_tick
            }
        };

        if let Some(dirty) = self.dirty_from.take() {
            if dirty >= start {
                let keep_index = (dirty - 1 - start).div_euclid(self.stride);
                if keep_index < 0 {
                    self.snapshots.clear();
                } else {
                    self.snapshots.truncate(keep_index as usize + 1);
                }
            }
        }

        if at_tick < start {
            return moved.then_some(start);
        }

        let target_index = (at_tick - start).div_euclid(self.stride) as usize;
        if self.snapshots.len() <= target_index {
            let (mut state, mut current_tick) = match self.snapshots.back() {
                Some(last) => (last.clone(), self.tick_of(start, self.snapshots.len() - 1)),
                None => (initial_state(), start - 1),
            };
            for index in self.snapshots.len()..=target_index {
                let next_tick = self.tick_of(start, index);
                state = advance(state, current_tick, next_tick, &mut apply_tick);
                self.snapshots.push_back(state.clone());
                current_tick = next_tick;
            }
        }

        if self.snapshots.len() > self.capacity {
            let overflow = self.snapshots.len() - self.capacity;
            self.snapshots.drain(..overflow);
            let new_start = start + overflow as i64 * self.stride;
            self.start_tick = Some(new_start);
            tracing::debug!(evicted = overflow, start_tick = new_start, "snapshots evicted");
            return Some(new_start);
        }

        moved.then_some(start)
    }

    /// State at `at_tick` from the nearest snapshot
    ///
    /// Before the window, the oldest snapshot is the best available
    /// answer. Returns `None` while no snapshot exists.
    pub fn state_at<F>(&self, at_tick: Tick, mut apply_tick: F) -> Option<S>
    where
        F: FnMut(S, Tick) -> S,
    {
        let start = self.start_tick?;
        let oldest = self.snapshots.front()?;
        if at_tick < start {
            return Some(oldest.clone());
        }

        let index = ((at_tick - start).div_euclid(self.stride) as usize).min(self.snapshots.len() - 1);
        let snap_tick = self.tick_of(start, index);
        let base = self.snapshots[index].clone();
        Some(advance(base, snap_tick, at_tick, &mut apply_tick))
    }

    fn tick_of(&self, start: Tick, index: usize) -> Tick {
        start + index as i64 * self.stride
    }
}

/// Apply ticks `from + 1 ..= to`
pub fn advance<S, F>(mut state: S, from: Tick, to: Tick, apply_tick: &mut F) -> S
where
    F: FnMut(S, Tick) -> S,
{
    for tick in from + 1..=to {
        state = apply_tick(state, tick);
    }
    state
}
