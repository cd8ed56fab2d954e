//! Tickroom Time - Server clock estimation
//!
//! This crate implements the client side of clock synchronisation:
//! - Local wall clocks (system and manually driven)
//! - Round-trip probe bookkeeping
//! - Minimum-RTT offset estimation
//! - One-shot "synced" notification

pub mod clock;
pub mod sync;

pub use clock::*;
pub use sync::*;
