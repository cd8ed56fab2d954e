//! State reconciliation engine
//!
//! Places every post at its official tick, replays ticks through the
//! simulation's pure functions and answers "state at tick T" through the
//! snapshot cache.
//!
//! Within a tick the application order is fixed: the tick step, then
//! confirmed posts by ascending index, then local posts in submission
//! order.

use std::sync::Arc;

use tickroom_core::{Millis, Post, PostName, Tick, TickRate};

use crate::{
    ConfirmedPosts, LocalPostTracker, Placement, RoomConfig, Simulation, SnapshotCache, Timeline,
};

/// What happened to an incoming post
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PostOutcome {
    /// Placed at a tick for the first time
    Inserted { tick: Tick },
    /// Known index redelivered; previous placement replaced
    Relocated { from: Tick, to: Tick },
    /// Tick precedes the retained window; dropped
    TooLate { tick: Tick },
    /// Offered as confirmed but carries no index
    Unconfirmed,
}

/// Tick-indexed reconciliation engine for one room
pub struct ReconciliationEngine<S: Simulation> {
    sim: S,
    config: RoomConfig,
    timeline: Timeline<S::Event>,
    confirmed: ConfirmedPosts<S::Event>,
    local: LocalPostTracker<S::Event>,
    cache: SnapshotCache<S::State>,
    /// Official time of the index-0 post
    initial_time: Option<Millis>,
    initial_tick: Option<Tick>,
}

impl<S: Simulation> ReconciliationEngine<S> {
    pub fn new(sim: S, config: RoomConfig) -> Self {
        let config = config.normalized();
        ReconciliationEngine {
            cache: SnapshotCache::new(config.snapshot_stride, config.snapshot_count),
            sim,
            config,
            timeline: Timeline::new(),
            confirmed: ConfirmedPosts::new(),
            local: LocalPostTracker::new(),
            initial_time: None,
            initial_tick: None,
        }
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn simulation(&self) -> &S {
        &self.sim
    }

    pub fn timeline(&self) -> &Timeline<S::Event> {
        &self.timeline
    }

    pub fn tick_rate(&self) -> TickRate {
        self.config.tick_rate
    }

    pub fn time_to_tick(&self, ms: Millis) -> Tick {
        self.config.tick_rate.time_to_tick(ms)
    }

    /// Tolerance-clamped timestamp of a post
    ///
    /// A client may place its post up to `tolerance_ms` before the
    /// server received it; anything earlier is clamped to that bound.
    pub fn official_time<D>(&self, post: &Post<D>) -> Millis {
        let earliest = post.server_time - self.config.tolerance_ms;
        if post.client_time <= earliest {
            earliest
        } else {
            post.client_time
        }
    }

    pub fn official_tick<D>(&self, post: &Post<D>) -> Tick {
        self.time_to_tick(self.official_time(post))
    }

    /// Official time of the room's first post, once seen
    pub fn initial_time(&self) -> Option<Millis> {
        self.initial_time
    }

    /// Tick the simulation starts at, once the index-0 post is seen
    pub fn initial_tick(&self) -> Option<Tick> {
        self.initial_tick
    }

    /// Confirmed posts still tracked inside the retained window
    pub fn confirmed_count(&self) -> usize {
        self.confirmed.len()
    }

    pub fn pending_local_count(&self) -> usize {
        self.local.len()
    }

    pub fn snapshot_len(&self) -> usize {
        self.cache.len()
    }

    pub fn snapshot_start_tick(&self) -> Option<Tick> {
        self.cache.start_tick()
    }

    fn is_before_window(&self, tick: Tick) -> bool {
        self.config.cache_enabled && self.cache.is_before_window(tick)
    }

    fn mark_dirty(&mut self, tick: Tick) {
        if self.config.cache_enabled {
            self.cache.mark_dirty(tick);
        }
    }

    /// Place a confirmed post
    pub fn add_room_post(&mut self, post: Post<S::Event>) -> PostOutcome {
        let Some(index) = post.index else {
            tracing::warn!(room = %post.room, name = %post.name, "confirmed post without index ignored");
            return PostOutcome::Unconfirmed;
        };
        let tick = self.official_tick(&post);

        if index == 0 && self.initial_time.is_none() {
            let time = self.official_time(&post);
            self.initial_time = Some(time);
            self.initial_tick = Some(self.time_to_tick(time));
            tracing::debug!(room = %post.room, initial_tick = tick, "initial post seen");
        }

        if self.is_before_window(tick) {
            tracing::debug!(room = %post.room, index, tick, "post before retained window dropped");
            return PostOutcome::TooLate { tick };
        }

        let post = Arc::new(post);
        let placement = Placement {
            post: Arc::clone(&post),
            tick,
        };
        match self.confirmed.insert(index, placement) {
            Some(previous) => {
                self.timeline.relocate(&previous.post, previous.tick, post, tick);
                self.mark_dirty(previous.tick.min(tick));
                tracing::trace!(index, from = previous.tick, to = tick, "post relocated");
                PostOutcome::Relocated {
                    from: previous.tick,
                    to: tick,
                }
            }
            None => {
                self.timeline.insert(post, tick);
                self.mark_dirty(tick);
                PostOutcome::Inserted { tick }
            }
        }
    }

    /// Accept a confirmed post, retiring the local prediction it confirms
    pub fn receive_confirmed(&mut self, post: Post<S::Event>) -> PostOutcome {
        if !post.name.is_empty() {
            self.remove_local_post(&post.name);
        }
        self.add_room_post(post)
    }

    /// Place a locally predicted post under its name
    pub fn add_local_post(&mut self, post: Post<S::Event>) -> PostOutcome {
        if self.local.contains(&post.name) {
            self.remove_local_post(&post.name);
        }

        let tick = self.official_tick(&post);
        if self.is_before_window(tick) {
            return PostOutcome::TooLate { tick };
        }

        let name = post.name.clone();
        let post = Arc::new(post);
        self.local.insert(
            name,
            Placement {
                post: Arc::clone(&post),
                tick,
            },
        );
        self.timeline.insert_local(post, tick);
        self.mark_dirty(tick);
        PostOutcome::Inserted { tick }
    }

    /// Drop a local prediction; false if none was pending under `name`
    pub fn remove_local_post(&mut self, name: &PostName) -> bool {
        let Some(placement) = self.local.remove(name) else {
            return false;
        };
        self.timeline.remove_local(&placement.post, placement.tick);
        self.mark_dirty(placement.tick);
        true
    }

    /// Advance `state` through `tick`
    pub fn apply_tick(&self, state: S::State, tick: Tick) -> S::State {
        apply_tick_in(&self.sim, &self.timeline, state, tick)
    }

    /// State after applying every tick up to and including `at_tick`
    pub fn state_at(&mut self, at_tick: Tick) -> S::State {
        let Some(initial_tick) = self.initial_tick else {
            return self.sim.initial_state();
        };
        if at_tick < initial_tick {
            return self.sim.initial_state();
        }
        if !self.config.cache_enabled {
            return self.state_at_uncached(at_tick);
        }

        let moved = {
            let sim = &self.sim;
            let timeline = &self.timeline;
            self.cache.ensure(
                at_tick,
                initial_tick,
                || sim.initial_state(),
                |state, tick| apply_tick_in(sim, timeline, state, tick),
            )
        };
        if let Some(start) = moved {
            self.prune_before(start);
        }

        let sim = &self.sim;
        let timeline = &self.timeline;
        self.cache
            .state_at(at_tick, |state, tick| apply_tick_in(sim, timeline, state, tick))
            .unwrap_or_else(|| sim.initial_state())
    }

    /// Full replay from the initial tick, bypassing the cache
    pub fn state_at_uncached(&self, at_tick: Tick) -> S::State {
        let initial = self.sim.initial_state();
        match self.initial_tick {
            Some(initial_tick) if at_tick >= initial_tick => (initial_tick..=at_tick)
                .fold(initial, |state, tick| self.apply_tick(state, tick)),
            _ => initial,
        }
    }

    /// Tick treated as settled when rendering at `current_tick`
    ///
    /// Far enough back that posts still allowed to arrive late, by the
    /// tolerance or by half the live round trip, have landed.
    pub fn render_past_tick(&self, current_tick: Tick, round_trip: Option<Millis>) -> Tick {
        let rate = self.config.tick_rate;
        let tolerance_ticks = rate.ticks_ceil(self.config.tolerance_ms);
        let half_rtt_ticks = round_trip.map_or(0, |rtt| rate.half_ticks_ceil(rtt));
        let past_ticks = tolerance_ticks.max(half_rtt_ticks + 1);
        (current_tick - past_ticks).max(0)
    }

    /// Blend of the settled and live states
    pub fn render_state(&mut self, current_tick: Tick, round_trip: Option<Millis>) -> S::Render {
        let past_tick = self.render_past_tick(current_tick, round_trip);
        let past = self.state_at(past_tick);
        let current = self.state_at(current_tick);
        self.sim.smooth(past, current)
    }

    fn prune_before(&mut self, tick: Tick) {
        self.timeline.prune_before(tick);
        self.confirmed.prune_before(tick);
        self.local.prune_before(tick);
    }
}

fn apply_tick_in<S: Simulation>(
    sim: &S,
    timeline: &Timeline<S::Event>,
    state: S::State,
    tick: Tick,
) -> S::State {
    let state = sim.step(state);
    match timeline.bucket(tick) {
        Some(bucket) => bucket
            .iter()
            .fold(state, |state, post| sim.apply_event(&post.data, state)),
        None => state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimulationFns;
    use proptest::prelude::*;
    use tickroom_core::RoomId;

    type LogSim = SimulationFns<Vec<u32>, u32, (usize, usize)>;

    /// Steps log 0, posts log their payload
    fn log_sim() -> LogSim {
        SimulationFns::new(
            Vec::new(),
            |mut s: Vec<u32>| {
                s.push(0);
                s
            },
            |e: &u32, mut s: Vec<u32>| {
                s.push(*e);
                s
            },
            |past: Vec<u32>, current: Vec<u32>| (past.len(), current.len()),
        )
    }

    fn engine(config: RoomConfig) -> ReconciliationEngine<LogSim> {
        ReconciliationEngine::new(log_sim(), config)
    }

    fn confirmed(index: u64, server: Millis, client: Millis, data: u32) -> Post<u32> {
        Post::confirmed(
            RoomId::new("r"),
            index,
            server,
            client,
            PostName::new(format!("c{index}")),
            data,
        )
    }

    fn named(index: u64, server: Millis, client: Millis, name: &str, data: u32) -> Post<u32> {
        Post::confirmed(RoomId::new("r"), index, server, client, PostName::new(name), data)
    }

    fn local(name: &str, time: Millis, data: u32) -> Post<u32> {
        Post::local(RoomId::new("r"), time, PostName::new(name), data)
    }

    #[test]
    fn test_tolerance_clamp() {
        let engine = engine(RoomConfig::new(10, 200));
        assert_eq!(engine.official_time(&confirmed(1, 1000, 500, 0)), 800);
        assert_eq!(engine.official_time(&confirmed(1, 1000, 1500, 0)), 1500);
        // Exactly at the bound is clamped to the same value
        assert_eq!(engine.official_time(&confirmed(1, 1000, 800, 0)), 800);
        assert_eq!(engine.official_time(&confirmed(1, 1000, 801, 0)), 801);
    }

    #[test]
    fn test_end_to_end_scenario() {
        let mut engine = engine(RoomConfig::new(10, 200));
        assert_eq!(engine.add_room_post(confirmed(0, 0, 0, 7)), PostOutcome::Inserted { tick: 0 });
        assert_eq!(engine.initial_tick(), Some(0));
        assert_eq!(engine.add_room_post(confirmed(1, 250, 250, 9)), PostOutcome::Inserted { tick: 2 });

        let sim = log_sim();
        let tick0 = sim.apply_event(&7, sim.step(sim.initial_state()));
        let tick1 = sim.step(tick0);
        let tick2 = sim.apply_event(&9, sim.step(tick1));

        assert_eq!(engine.state_at(2), tick2);
        assert_eq!(engine.state_at(2), vec![0, 7, 0, 0, 9]);
        assert_eq!(engine.confirmed_count(), 2);
    }

    #[test]
    fn test_unknown_initial_tick_returns_initial_state() {
        let mut engine = engine(RoomConfig::new(10, 200));
        engine.add_room_post(confirmed(3, 500, 500, 1));
        assert_eq!(engine.initial_tick(), None);
        assert!(engine.state_at(50).is_empty());

        engine.add_room_post(confirmed(0, 300, 300, 2));
        assert_eq!(engine.initial_tick(), Some(3));
        assert!(engine.state_at(2).is_empty());
        assert_eq!(engine.state_at(5), vec![0, 2, 0, 0, 1]);
    }

    #[test]
    fn test_application_order_within_tick() {
        let mut engine = engine(RoomConfig::new(10, 200));
        engine.add_room_post(confirmed(0, 0, 0, 1));
        engine.add_local_post(local("localaaa", 220, 99));
        engine.add_room_post(confirmed(3, 250, 250, 30));
        engine.add_local_post(local("localbbb", 240, 98));
        engine.add_room_post(confirmed(1, 250, 250, 10));
        engine.add_room_post(confirmed(2, 250, 250, 20));

        assert_eq!(engine.state_at(2), vec![0, 1, 0, 0, 10, 20, 30, 99, 98]);
    }

    #[test]
    fn test_idempotent_redelivery() {
        let mut engine = engine(RoomConfig::new(10, 200).with_snapshot_stride(2));
        engine.add_room_post(confirmed(0, 0, 0, 1));
        engine.add_room_post(confirmed(1, 450, 450, 5));
        let before: Vec<_> = (0..12).map(|t| engine.state_at(t)).collect();

        assert_eq!(
            engine.add_room_post(confirmed(1, 450, 450, 5)),
            PostOutcome::Relocated { from: 4, to: 4 }
        );
        let after: Vec<_> = (0..12).map(|t| engine.state_at(t)).collect();
        assert_eq!(before, after);
        assert_eq!(engine.timeline().bucket(4).unwrap().room().len(), 1);
    }

    #[test]
    fn test_redelivery_with_new_time_relocates() {
        let mut engine = engine(RoomConfig::new(10, 1000).with_snapshot_stride(2));
        engine.add_room_post(confirmed(0, 0, 0, 1));
        engine.add_room_post(confirmed(1, 500, 500, 5));
        assert_eq!(engine.state_at(8), vec![0, 1, 0, 0, 0, 0, 0, 5, 0, 0, 0]);

        assert_eq!(
            engine.add_room_post(confirmed(1, 500, 200, 5)),
            PostOutcome::Relocated { from: 5, to: 2 }
        );
        assert!(engine.timeline().bucket(5).is_none());
        assert_eq!(engine.state_at(8), vec![0, 1, 0, 0, 5, 0, 0, 0, 0, 0, 0]);
        assert_eq!(engine.state_at(8), engine.state_at_uncached(8));
    }

    #[test]
    fn test_late_post_invalidates_later_snapshots() {
        let mut engine = engine(RoomConfig::new(10, 200).with_snapshot_stride(4));
        engine.add_room_post(confirmed(0, 0, 0, 1));
        let stale = engine.state_at(20);
        assert!(engine.snapshot_len() >= 5);

        engine.add_room_post(confirmed(1, 550, 550, 42));
        let fresh = engine.state_at(20);
        assert_ne!(stale, fresh);
        assert!(fresh.contains(&42));
        assert_eq!(fresh, engine.state_at_uncached(20));
    }

    #[test]
    fn test_confirmation_retires_local_prediction() {
        let mut engine = engine(RoomConfig::new(10, 500));
        engine.add_room_post(confirmed(0, 0, 0, 1));
        engine.add_local_post(local("aaaaaaaa", 300, 5));
        assert_eq!(engine.pending_local_count(), 1);
        assert_eq!(engine.state_at(3), vec![0, 1, 0, 0, 0, 5]);

        engine.receive_confirmed(named(1, 350, 300, "aaaaaaaa", 5));
        assert_eq!(engine.pending_local_count(), 0);
        assert_eq!(engine.state_at(3), vec![0, 1, 0, 0, 0, 5]);
        assert!(engine.timeline().bucket(3).unwrap().local().is_empty());
    }

    #[test]
    fn test_local_post_same_name_replaces() {
        let mut engine = engine(RoomConfig::new(10, 500));
        engine.add_room_post(confirmed(0, 0, 0, 1));
        engine.add_local_post(local("dupename", 100, 5));
        engine.add_local_post(local("dupename", 300, 6));

        assert_eq!(engine.pending_local_count(), 1);
        assert!(engine.timeline().bucket(1).is_none());
        assert_eq!(engine.state_at(3), vec![0, 1, 0, 0, 0, 6]);
    }

    #[test]
    fn test_remove_local_post() {
        let mut engine = engine(RoomConfig::new(10, 500));
        engine.add_room_post(confirmed(0, 0, 0, 1));
        engine.add_local_post(local("goneaaaa", 100, 5));
        assert_eq!(engine.state_at(1), vec![0, 1, 0, 5]);

        assert!(engine.remove_local_post(&PostName::new("goneaaaa")));
        assert!(!engine.remove_local_post(&PostName::new("goneaaaa")));
        assert_eq!(engine.state_at(1), vec![0, 1, 0]);
    }

    #[test]
    fn test_bounded_retention_drops_late_posts() {
        let mut engine = engine(
            RoomConfig::new(10, 0)
                .with_snapshot_stride(2)
                .with_snapshot_count(4),
        );
        engine.add_room_post(confirmed(0, 0, 0, 1));
        engine.state_at(100);

        assert_eq!(engine.snapshot_len(), 4);
        assert_eq!(engine.snapshot_start_tick(), Some(94));
        // Index 0 sat at tick 0 and was pruned with the window
        assert_eq!(engine.confirmed_count(), 0);
        assert!(engine.timeline().is_empty());

        assert_eq!(
            engine.add_room_post(confirmed(1, 500, 500, 9)),
            PostOutcome::TooLate { tick: 5 }
        );
        assert_eq!(
            engine.add_local_post(local("tooolate", 900, 9)),
            PostOutcome::TooLate { tick: 9 }
        );
        assert_eq!(engine.confirmed_count(), 0);
        assert_eq!(engine.pending_local_count(), 0);
    }

    #[test]
    fn test_query_before_window_returns_oldest_snapshot() {
        let mut engine = engine(
            RoomConfig::new(10, 0)
                .with_snapshot_stride(2)
                .with_snapshot_count(2),
        );
        engine.add_room_post(confirmed(0, 0, 0, 1));
        engine.state_at(20);
        let start = engine.snapshot_start_tick().unwrap();
        assert_eq!(start, 18);

        let oldest = engine.state_at(start);
        assert_eq!(engine.state_at(5), oldest);
    }

    #[test]
    fn test_cache_disabled_matches_cached() {
        let config = RoomConfig::new(20, 100).with_snapshot_stride(3);
        let mut cached = engine(config.clone());
        let mut uncached = engine(config.with_cache(false));

        for e in [&mut cached, &mut uncached] {
            e.add_room_post(confirmed(0, 0, 0, 1));
            e.add_room_post(confirmed(2, 410, 400, 3));
            e.add_room_post(confirmed(1, 410, 200, 2));
            e.add_local_post(local("pending1", 330, 4));
        }
        for tick in 0..25 {
            assert_eq!(cached.state_at(tick), uncached.state_at(tick));
        }
        assert_eq!(uncached.snapshot_len(), 0);
    }

    #[test]
    fn test_render_past_tick() {
        let engine = engine(RoomConfig::new(10, 250));
        assert_eq!(engine.render_past_tick(10, None), 7);
        assert_eq!(engine.render_past_tick(10, Some(40)), 7);
        // half of 900ms is 4.5 ticks, rounded up to 5, plus one
        assert_eq!(engine.render_past_tick(10, Some(900)), 4);
        assert_eq!(engine.render_past_tick(2, None), 0);
    }

    #[test]
    fn test_render_state_blends_past_and_current() {
        let mut engine = engine(RoomConfig::new(10, 250));
        engine.add_room_post(confirmed(0, 0, 0, 1));
        engine.add_room_post(confirmed(1, 950, 950, 2));

        // past tick 7: 8 steps + 1 post; current tick 10: 11 steps + 2 posts
        assert_eq!(engine.render_state(10, None), (9, 13));
    }

    #[derive(Clone, Debug)]
    enum Op {
        Room { index: u64, server: Millis, client: Millis, data: u32 },
        Local { name: u8, time: Millis, data: u32 },
        Forget { name: u8 },
        Query(Tick),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u64..20, 200i64..3000, 0i64..3000, 1u32..100)
                .prop_map(|(index, server, client, data)| Op::Room { index, server, client, data }),
            (0u8..4, 0i64..3000, 100u32..200).prop_map(|(name, time, data)| Op::Local { name, time, data }),
            (0u8..4).prop_map(|name| Op::Forget { name }),
            (0i64..40).prop_map(Op::Query),
        ]
    }

    fn run(engine: &mut ReconciliationEngine<LogSim>, op: &Op) {
        match op {
            Op::Room { index, server, client, data } => {
                engine.add_room_post(confirmed(*index, *server, *client, *data));
            }
            Op::Local { name, time, data } => {
                engine.add_local_post(local(&format!("local{name:03}"), *time, *data));
            }
            Op::Forget { name } => {
                engine.remove_local_post(&PostName::new(format!("local{name:03}")));
            }
            Op::Query(tick) => {
                engine.state_at(*tick);
            }
        }
    }

    proptest! {
        #[test]
        fn prop_cached_matches_uncached(ops in proptest::collection::vec(op(), 1..60), probe in 0i64..40) {
            let config = RoomConfig::new(10, 200).with_snapshot_stride(3);
            let mut cached = engine(config.clone());
            let mut uncached = engine(config.with_cache(false));
            cached.add_room_post(confirmed(0, 0, 0, 1));
            uncached.add_room_post(confirmed(0, 0, 0, 1));

            for op in &ops {
                run(&mut cached, op);
                run(&mut uncached, op);
                if let Op::Query(tick) = op {
                    prop_assert_eq!(cached.state_at(*tick), uncached.state_at(*tick));
                }
            }
            prop_assert_eq!(cached.state_at(probe), uncached.state_at_uncached(probe));
        }

        #[test]
        fn prop_retention_bounded(ops in proptest::collection::vec(op(), 1..80)) {
            let mut engine = engine(
                RoomConfig::new(10, 200).with_snapshot_stride(2).with_snapshot_count(3),
            );
            engine.add_room_post(confirmed(0, 0, 0, 1));
            let mut last_start = i64::MIN;

            for op in &ops {
                run(&mut engine, op);
                prop_assert!(engine.snapshot_len() <= 3);
                if let Some(start) = engine.snapshot_start_tick() {
                    prop_assert!(start >= last_start);
                    last_start = start;
                }
            }
        }
    }
}
