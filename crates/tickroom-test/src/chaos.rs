//! Chaos network for tickroom message streams
//!
//! Simulates hostile delivery between a client and the server:
//! - Latency with jitter
//! - Loss, including bursts
//! - Reordering
//! - Duplication
//!
//! A real room connection is a reliable stream and the client never
//! retransmits, so a lost post is never confirmed. Convergence runs use
//! the lossless profiles.

use std::collections::VecDeque;
use std::time::Duration;

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Jitter distribution type
#[derive(Clone, Debug)]
pub enum JitterDistribution {
    /// Uniform in `[min_ms, max_ms)`
    Uniform { min_ms: u32, max_ms: u32 },
    /// Normal distribution (mean, stddev), clamped at zero
    Normal { mean_ms: f64, stddev_ms: f64 },
    /// Pareto distribution (heavy tail), capped at one second
    Pareto { scale_ms: f64, shape: f64 },
}

impl JitterDistribution {
    /// Sample a jitter value
    pub fn sample(&self, rng: &mut StdRng) -> Duration {
        match self {
            JitterDistribution::Uniform { min_ms, max_ms } => {
                if max_ms <= min_ms {
                    return Duration::from_millis(u64::from(*min_ms));
                }
                let dist = Uniform::new(*min_ms, *max_ms);
                Duration::from_millis(u64::from(dist.sample(rng)))
            }
            JitterDistribution::Normal { mean_ms, stddev_ms } => {
                // Box-Muller
                let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
                let u2: f64 = rng.gen();
                let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
                let value = mean_ms + stddev_ms * z;
                Duration::from_millis(value.max(0.0) as u64)
            }
            JitterDistribution::Pareto { scale_ms, shape } => {
                let u: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
                let value = scale_ms / u.powf(1.0 / shape);
                Duration::from_millis(value.min(1000.0) as u64)
            }
        }
    }
}

/// Network chaos configuration
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    /// Base one-way latency
    pub base_latency: Duration,
    /// Jitter distribution
    pub jitter: JitterDistribution,
    /// Message loss rate (0.0 - 1.0)
    pub loss_rate: f64,
    /// Burst loss probability
    pub burst_loss_prob: f64,
    /// Burst loss length range
    pub burst_length: (u32, u32),
    /// Reorder probability
    pub reorder_prob: f64,
    /// Reorder depth (max messages jumped)
    pub reorder_depth: u32,
    /// Duplicate probability
    pub duplicate_prob: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(50),
            jitter: JitterDistribution::Uniform {
                min_ms: 0,
                max_ms: 50,
            },
            loss_rate: 0.0,
            burst_loss_prob: 0.0,
            burst_length: (0, 0),
            reorder_prob: 0.05,
            reorder_depth: 3,
            duplicate_prob: 0.01,
        }
    }
}

impl ChaosConfig {
    /// Same-datacenter conditions, no disorder
    pub fn lan() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(2),
            jitter: JitterDistribution::Uniform {
                min_ms: 0,
                max_ms: 2,
            },
            reorder_prob: 0.0,
            reorder_depth: 0,
            duplicate_prob: 0.0,
            ..Self::default()
        }
    }

    /// Cross-continent conditions with occasional disorder
    pub fn wan() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(80),
            jitter: JitterDistribution::Normal {
                mean_ms: 20.0,
                stddev_ms: 15.0,
            },
            reorder_prob: 0.05,
            reorder_depth: 4,
            duplicate_prob: 0.02,
            ..Self::default()
        }
    }

    /// Heavy-tailed latency with frequent reordering and duplication
    pub fn hostile() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(150),
            jitter: JitterDistribution::Pareto {
                scale_ms: 40.0,
                shape: 1.3,
            },
            reorder_prob: 0.2,
            reorder_depth: 10,
            duplicate_prob: 0.1,
            ..Self::default()
        }
    }

    /// `hostile` plus loss, for loss accounting rather than convergence
    pub fn lossy() -> Self {
        ChaosConfig {
            loss_rate: 0.1,
            burst_loss_prob: 0.05,
            burst_length: (2, 6),
            ..Self::hostile()
        }
    }

    pub fn is_lossless(&self) -> bool {
        self.loss_rate == 0.0 && self.burst_loss_prob == 0.0
    }
}

/// Message in the chaos network
#[derive(Clone, Debug)]
pub struct ChaosMessage<T> {
    pub payload: T,
    /// Scheduled delivery time (relative to start)
    pub delivery_time: Duration,
    /// Original send time
    pub send_time: Duration,
    /// Sequence number (for tracking)
    pub seq: u64,
}

/// Chaos network statistics
#[derive(Clone, Debug, Default)]
pub struct ChaosStats {
    pub sent: u64,
    pub delivered: u64,
    pub lost: u64,
    pub reordered: u64,
    pub duplicated: u64,
    pub total_latency_ms: u64,
    pub max_latency_ms: u64,
}

impl ChaosStats {
    pub fn loss_rate(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.lost as f64 / self.sent as f64
        }
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.delivered == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.delivered as f64
        }
    }

    /// Fold another link's counters into this one
    pub fn merge(&mut self, other: &ChaosStats) {
        self.sent += other.sent;
        self.delivered += other.delivered;
        self.lost += other.lost;
        self.reordered += other.reordered;
        self.duplicated += other.duplicated;
        self.total_latency_ms += other.total_latency_ms;
        self.max_latency_ms = self.max_latency_ms.max(other.max_latency_ms);
    }
}

/// One direction of a simulated link
///
/// Delivery is head-of-line: a message is released only once every
/// message queued ahead of it has been.
pub struct ChaosNetwork<T> {
    config: ChaosConfig,
    rng: StdRng,
    in_flight: VecDeque<ChaosMessage<T>>,
    current_time: Duration,
    burst_remaining: u32,
    next_seq: u64,
    stats: ChaosStats,
}

impl<T: Clone> ChaosNetwork<T> {
    /// Create a new chaos network with seed
    pub fn new(config: ChaosConfig, seed: u64) -> Self {
        ChaosNetwork {
            config,
            rng: StdRng::seed_from_u64(seed),
            in_flight: VecDeque::new(),
            current_time: Duration::ZERO,
            burst_remaining: 0,
            next_seq: 0,
            stats: ChaosStats::default(),
        }
    }

    /// Send a message into the network
    pub fn send(&mut self, payload: T) {
        self.stats.sent += 1;
        let seq = self.next_seq;
        self.next_seq += 1;

        if self.should_drop() {
            self.stats.lost += 1;
            return;
        }

        let jitter = self.config.jitter.sample(&mut self.rng);
        let delivery_time = self.current_time + self.config.base_latency + jitter;

        let duplicate = (self.rng.gen::<f64>() < self.config.duplicate_prob).then(|| payload.clone());

        let message = ChaosMessage {
            payload,
            delivery_time,
            send_time: self.current_time,
            seq,
        };

        if self.config.reorder_depth > 0
            && !self.in_flight.is_empty()
            && self.rng.gen::<f64>() < self.config.reorder_prob
        {
            let depth = self.config.reorder_depth.min(self.in_flight.len() as u32);
            let jump = self.rng.gen_range(1..=depth) as usize;
            let insert_at = self.in_flight.len() - jump;
            self.in_flight.insert(insert_at, message);
            self.stats.reordered += 1;
        } else {
            self.in_flight.push_back(message);
        }

        if let Some(payload) = duplicate {
            let extra = self.config.jitter.sample(&mut self.rng);
            self.in_flight.push_back(ChaosMessage {
                payload,
                delivery_time: delivery_time + extra,
                send_time: self.current_time,
                seq,
            });
            self.stats.duplicated += 1;
        }
    }

    fn should_drop(&mut self) -> bool {
        if self.burst_remaining > 0 {
            self.burst_remaining -= 1;
            return true;
        }

        if self.config.burst_loss_prob > 0.0 && self.rng.gen::<f64>() < self.config.burst_loss_prob {
            let (min, max) = self.config.burst_length;
            self.burst_remaining = self.rng.gen_range(min..=max.max(min));
            return true;
        }

        self.config.loss_rate > 0.0 && self.rng.gen::<f64>() < self.config.loss_rate
    }

    /// Advance time and collect delivered messages
    pub fn tick(&mut self, dt: Duration) -> Vec<T> {
        self.current_time += dt;

        let mut delivered = Vec::new();
        while self
            .in_flight
            .front()
            .is_some_and(|m| m.delivery_time <= self.current_time)
        {
            let Some(message) = self.in_flight.pop_front() else {
                break;
            };
            let latency = self
                .current_time
                .saturating_sub(message.send_time)
                .as_millis() as u64;
            self.stats.delivered += 1;
            self.stats.total_latency_ms += latency;
            self.stats.max_latency_ms = self.stats.max_latency_ms.max(latency);
            delivered.push(message.payload);
        }
        delivered
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn stats(&self) -> &ChaosStats {
        &self.stats
    }

    pub fn current_time(&self) -> Duration {
        self.current_time
    }
}
