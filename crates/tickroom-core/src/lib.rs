//! Tickroom Core - Fundamental types and primitives
//!
//! This crate defines the core types shared by every tickroom crate:
//! - Identifiers (RoomId, PostName) and post name generation
//! - Time primitives (Tick, TickRate)
//! - Posts, the timestamped events injected into a room
//! - The error taxonomy

pub mod error;
pub mod id;
pub mod post;
pub mod time;

pub use error::*;
pub use id::*;
pub use post::*;
pub use time::*;
