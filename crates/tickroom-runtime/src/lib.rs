//! Tickroom Runtime - Shared connection and per-room engines
//!
//! This crate wires the pieces together:
//! 1. Drive the transport event stream
//! 2. Probe the server clock on open and then periodically
//! 3. Route confirmed posts to the rooms watching them
//! 4. Bootstrap each room (watch, then load from 0) once synced
//! 5. Stamp and send local posts, predicting them immediately
//! 6. Answer state, render and tick queries per room

pub mod client;
pub mod config;
pub mod logging;
pub mod room;

pub use client::*;
pub use config::*;
pub use logging::*;
pub use room::*;
