//! Convergence harness
//!
//! Runs several simulated clients against one `SimulatedServer` on a
//! shared virtual clock. Every client has its own clock skew, probes the
//! server like a real client, predicts its own posts and reconciles the
//! confirmed stream. All traffic crosses chaos links as wire text.
//!
//! Once the network is quiet, every client's engine must agree with a
//! replay of the server's log.
//!
//! The harness checks the engine alone. Its clients stand in for
//! `tickroom_runtime::Client` and `Room` with their own probe schedule,
//! bootstrap and submit stamping so that the whole run stays on virtual
//! time. The runtime path is covered through `ChannelHub` in `server.rs`.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use tickroom_core::{
    Millis, NameSource, Post, PostName, RoomId, SeededNames, Tick, TickroomError, TickroomResult,
};
use tickroom_state::{ReconciliationEngine, RoomConfig, Simulation};
use tickroom_time::ClockSync;
use tickroom_wire::{decode, decode_payload, encode, encode_payload, ClientMessage, ServerMessage};

use crate::{ChaosConfig, ChaosNetwork, ChaosStats, ConnectionId, SimulatedServer};

/// Harness configuration
#[derive(Clone, Debug)]
pub struct HarnessConfig {
    /// Number of simulated clients
    pub clients: usize,
    pub room: RoomConfig,
    /// Link conditions, both directions
    pub chaos: ChaosConfig,
    /// Virtual time per step
    pub step: Duration,
    pub probe_interval: Duration,
    /// Client `i` runs its clock `i * clock_skew_ms` ahead of the server
    pub clock_skew_ms: Millis,
    pub seed: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            clients: 3,
            room: RoomConfig::default(),
            chaos: ChaosConfig::wan(),
            step: Duration::from_millis(10),
            probe_interval: Duration::from_millis(2000),
            clock_skew_ms: 7_919,
            seed: 0x7ee7,
        }
    }
}

/// One simulated client
struct SimClient<S: Simulation> {
    skew: Millis,
    sync: ClockSync,
    engine: ReconciliationEngine<S>,
    names: SeededNames,
    uplink: ChaosNetwork<String>,
    downlink: ChaosNetwork<String>,
    next_probe_at: Millis,
}

impl<S: Simulation> SimClient<S> {
    fn local_now(&self, now: Millis) -> Millis {
        now + self.skew
    }
}

/// Multi-client convergence harness
pub struct ConvergenceHarness<S: Simulation> {
    config: HarnessConfig,
    room: RoomId,
    server: SimulatedServer,
    clients: Vec<SimClient<S>>,
    /// Builds a fresh simulation; used for clients and the reference replay
    factory: Box<dyn Fn() -> S>,
    /// Virtual server time
    now: Millis,
    probing: bool,
}

impl<S> ConvergenceHarness<S>
where
    S: Simulation,
    S::Event: Serialize + DeserializeOwned,
{
    /// Build the harness; the virtual server clock starts at `start`
    pub fn new(config: HarnessConfig, start: Millis, factory: impl Fn() -> S + 'static) -> Self {
        let room = RoomId::new("harness");
        let clients = (0..config.clients)
            .map(|i| {
                let seed = config.seed.wrapping_add(i as u64 * 2);
                SimClient {
                    skew: i as Millis * config.clock_skew_ms,
                    sync: ClockSync::new(),
                    engine: ReconciliationEngine::new(factory(), config.room.clone()),
                    names: SeededNames::new(seed),
                    uplink: ChaosNetwork::new(config.chaos.clone(), seed),
                    downlink: ChaosNetwork::new(config.chaos.clone(), seed.wrapping_add(1)),
                    next_probe_at: Millis::MIN,
                }
            })
            .collect();

        ConvergenceHarness {
            config,
            room,
            server: SimulatedServer::new(),
            clients,
            factory: Box::new(factory),
            now: start,
            probing: true,
        }
    }

    pub fn now(&self) -> Millis {
        self.now
    }

    pub fn server(&self) -> &SimulatedServer {
        &self.server
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn engine(&self, client: usize) -> &ReconciliationEngine<S> {
        &self.clients[client].engine
    }

    pub fn is_synced(&self, client: usize) -> bool {
        self.clients[client].sync.is_synced()
    }

    /// Client's estimate of the server clock
    pub fn server_time_estimate(&self, client: usize) -> TickroomResult<Millis> {
        let c = &self.clients[client];
        c.sync.server_time(c.local_now(self.now))
    }

    /// Advance virtual time by one step
    pub fn step(&mut self) {
        let dt = self.config.step;
        self.now += dt.as_millis() as Millis;
        let now = self.now;
        let probe_every = self.config.probe_interval.as_millis() as Millis;

        for c in &mut self.clients {
            let local = c.local_now(now);
            if self.probing && local >= c.next_probe_at {
                c.sync.begin_probe(local);
                send(&mut c.uplink, &ClientMessage::GetTime);
                c.next_probe_at = local + probe_every;
            }
        }

        for id in 0..self.clients.len() {
            for text in self.clients[id].uplink.tick(dt) {
                for (to, reply) in self.server.handle(ConnectionId(id), &text, now) {
                    if let Some(target) = self.clients.get_mut(to.0) {
                        target.downlink.send(reply);
                    }
                }
            }
        }

        for id in 0..self.clients.len() {
            let delivered = self.clients[id].downlink.tick(dt);
            for text in delivered {
                self.receive(id, &text);
            }
        }
    }

    fn receive(&mut self, id: usize, text: &str) {
        let room = self.room.clone();
        let now = self.now;
        let c = &mut self.clients[id];
        match decode::<ServerMessage>(text) {
            Ok(ServerMessage::InfoTime { time }) => {
                let sample = c.sync.record_reply(time, c.local_now(now));
                if sample.is_first_sync() {
                    tracing::debug!(client = id, rtt_ms = sample.round_trip, "harness client synced");
                    send(&mut c.uplink, &ClientMessage::Watch { room: room.clone() });
                    send(&mut c.uplink, &ClientMessage::Load { room, from: 0 });
                }
                sample.notify();
            }
            Ok(message @ ServerMessage::InfoPost { .. }) => {
                let Some(post) = message.into_post() else {
                    return;
                };
                match decode_payload::<S::Event>(post) {
                    Ok(post) => {
                        c.engine.receive_confirmed(post);
                    }
                    Err(e) => tracing::warn!(client = id, error = %e, "harness skipping post"),
                }
            }
            Ok(ServerMessage::Unknown) => {}
            Err(e) => tracing::warn!(client = id, error = %e, "harness dropping message"),
        }
    }

    /// Run `steps` steps
    pub fn run(&mut self, steps: usize) {
        for _ in 0..steps {
            self.step();
        }
    }

    /// Step until every client is synced; false if `max_steps` ran out
    pub fn run_until_synced(&mut self, max_steps: usize) -> bool {
        for _ in 0..max_steps {
            if (0..self.clients.len()).all(|i| self.is_synced(i)) {
                return true;
            }
            self.step();
        }
        (0..self.clients.len()).all(|i| self.is_synced(i))
    }

    /// Step until no message is in flight; false if `max_steps` ran out
    ///
    /// Clock probes are paused meanwhile.
    pub fn settle(&mut self, max_steps: usize) -> bool {
        self.probing = false;
        let mut quiet = self.is_quiet();
        for _ in 0..max_steps {
            if quiet {
                break;
            }
            self.step();
            quiet = self.is_quiet();
        }
        self.probing = true;
        quiet
    }

    fn is_quiet(&self) -> bool {
        self.clients
            .iter()
            .all(|c| c.uplink.is_idle() && c.downlink.is_idle())
    }

    /// Post from `client`, predicting it locally
    pub fn submit(&mut self, client: usize, event: S::Event) -> TickroomResult<PostName> {
        let now = self.now;
        let room = self.room.clone();
        let c = self
            .clients
            .get_mut(client)
            .ok_or(TickroomError::NotConnected)?;
        let time = c.sync.server_time(c.local_now(now))?;
        let name = c.names.next_name();
        let data = encode_payload(&event)?;
        send(
            &mut c.uplink,
            &ClientMessage::Post {
                room: room.clone(),
                time,
                name: name.clone(),
                data,
            },
        );
        c.engine
            .add_local_post(Post::local(room, time, name.clone(), event));
        Ok(name)
    }

    /// Each client's state at `tick`
    pub fn states_at(&mut self, tick: Tick) -> Vec<S::State> {
        self.clients
            .iter_mut()
            .map(|c| c.engine.state_at(tick))
            .collect()
    }

    /// State at `tick` replayed from the server's log alone
    pub fn authoritative_state(&self, tick: Tick) -> S::State {
        let mut engine = ReconciliationEngine::new((self.factory)(), self.config.room.clone());
        for post in self.server.posts(&self.room) {
            match decode_payload::<S::Event>(post.clone()) {
                Ok(post) => {
                    engine.add_room_post(post);
                }
                Err(e) => tracing::warn!(error = %e, "reference replay skipping post"),
            }
        }
        engine.state_at_uncached(tick)
    }

    /// Tick of the current server time
    pub fn current_tick(&self) -> Tick {
        self.config.room.tick_rate.time_to_tick(self.now)
    }

    /// Link statistics over every client, both directions
    pub fn network_stats(&self) -> ChaosStats {
        let mut stats = ChaosStats::default();
        for c in &self.clients {
            stats.merge(c.uplink.stats());
            stats.merge(c.downlink.stats());
        }
        stats
    }
}

impl<S> ConvergenceHarness<S>
where
    S: Simulation,
    S::State: PartialEq,
    S::Event: Serialize + DeserializeOwned,
{
    /// Whether every client agrees with the server's log at `tick`
    pub fn converged_at(&mut self, tick: Tick) -> bool {
        let reference = self.authoritative_state(tick);
        self.states_at(tick).iter().all(|state| *state == reference)
    }
}

fn send(link: &mut ChaosNetwork<String>, message: &ClientMessage) {
    match encode(message) {
        Ok(text) => link.send(text),
        Err(e) => tracing::warn!(error = %e, "harness failed to encode message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serde::Deserialize;
    use tickroom_state::SimulationFns;

    /// Walkers on a line: each tick every walker moves by its velocity
    #[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
    enum Walk {
        Join(u8),
        Turn(u8, i8),
    }

    type Walkers = Vec<(u8, i64, i64)>;

    fn walkers() -> SimulationFns<Walkers, Walk, usize> {
        SimulationFns::new(
            Vec::new(),
            |mut state: Walkers| {
                for walker in &mut state {
                    walker.1 += walker.2;
                }
                state
            },
            |event: &Walk, mut state: Walkers| {
                match *event {
                    Walk::Join(id) => {
                        if !state.iter().any(|w| w.0 == id) {
                            state.push((id, 0, 0));
                        }
                    }
                    Walk::Turn(id, v) => {
                        if let Some(w) = state.iter_mut().find(|w| w.0 == id) {
                            w.2 = i64::from(v);
                        }
                    }
                }
                state
            },
            |_past: Walkers, current: Walkers| current.len(),
        )
    }

    fn drive(config: HarnessConfig) -> ConvergenceHarness<SimulationFns<Walkers, Walk, usize>> {
        let mut harness = ConvergenceHarness::new(config, 1_000_000, walkers);
        assert!(harness.run_until_synced(2_000));
        // Every watch and load lands before the first post
        assert!(harness.settle(10_000));

        let mut rng = StdRng::seed_from_u64(17);
        for client in 0..harness.client_count() {
            harness.submit(client, Walk::Join(client as u8)).unwrap();
        }
        for _ in 0..200 {
            let client = rng.gen_range(0..harness.client_count());
            let velocity = rng.gen_range(-3i8..=3);
            harness.submit(client, Walk::Turn(client as u8, velocity)).unwrap();
            harness.run(rng.gen_range(0..5));
        }
        assert!(harness.settle(10_000));
        harness
    }

    #[test]
    fn test_submit_before_sync_fails() {
        let mut harness = ConvergenceHarness::new(HarnessConfig::default(), 0, walkers);
        assert_eq!(
            harness.submit(0, Walk::Join(0)).unwrap_err(),
            TickroomError::NotSynced
        );
    }

    #[test]
    fn test_clock_estimates_cancel_skew() {
        let config = HarnessConfig {
            chaos: ChaosConfig::lan(),
            ..HarnessConfig::default()
        };
        let mut harness = ConvergenceHarness::new(config, 500_000, walkers);
        assert!(harness.run_until_synced(100));
        for client in 0..harness.client_count() {
            let error = harness.server_time_estimate(client).unwrap() - harness.now();
            assert!(error.abs() <= 20, "client {client} off by {error}ms");
        }
    }

    #[test]
    fn test_converges_on_wan() {
        let mut harness = drive(HarnessConfig::default());
        let tick = harness.current_tick();
        // Duplicated uplink messages are confirmed twice
        assert!(harness.server().post_count(&RoomId::new("harness")) >= 203);
        assert!(harness.converged_at(tick));
        for client in 0..harness.client_count() {
            assert_eq!(harness.engine(client).pending_local_count(), 0);
        }
    }

    #[test]
    fn test_converges_on_hostile_network() {
        let config = HarnessConfig {
            clients: 5,
            chaos: ChaosConfig::hostile(),
            room: RoomConfig::new(30, 500),
            seed: 99,
            ..HarnessConfig::default()
        };
        let mut harness = drive(config);
        let stats = harness.network_stats();
        assert!(stats.reordered > 0);
        assert!(stats.duplicated > 0);

        let tick = harness.current_tick();
        assert!(harness.converged_at(tick));
        assert!(harness.converged_at(tick - 100));
    }

    #[test]
    fn test_converges_without_cache() {
        let config = HarnessConfig {
            room: RoomConfig::new(20, 300).with_cache(false),
            ..HarnessConfig::default()
        };
        let mut harness = drive(config);
        let tick = harness.current_tick();
        assert!(harness.converged_at(tick));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]
        #[test]
        fn prop_converges_for_any_seed(seed in any::<u64>(), clients in 2usize..5) {
            let config = HarnessConfig {
                clients,
                seed,
                ..HarnessConfig::default()
            };
            let mut harness = drive(config);
            let tick = harness.current_tick();
            prop_assert!(harness.converged_at(tick));
        }
    }
}
