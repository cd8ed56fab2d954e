//! Tickroom Test Harness - Chaos testing and convergence validation
//!
//! This crate provides:
//! - Chaos network (latency, jitter, reordering, duplication, loss)
//! - Simulated authoritative room server
//! - In-process hub serving real clients
//! - Multi-client convergence harness

pub mod chaos;
pub mod harness;
pub mod server;

pub use chaos::*;
pub use harness::*;
pub use server::*;
