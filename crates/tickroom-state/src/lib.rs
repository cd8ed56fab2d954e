//! Tickroom State Engine - Event-sourced, tick-indexed state reconstruction
//!
//! This crate implements the reconciliation core:
//! - Timeline of confirmed and locally predicted posts per tick
//! - Tolerance policy placing each post at its official tick
//! - Snapshot cache with dirty-tracking invalidation and bounded retention
//! - Local post bookkeeping until confirmation
//! - Settled/live state blending for rendering

pub mod config;
pub mod reconcile;
pub mod simulation;
pub mod snapshot;
pub mod timeline;
pub mod tracker;

pub use config::*;
pub use reconcile::*;
pub use simulation::*;
pub use snapshot::*;
pub use timeline::*;
pub use tracker::*;
