//! Tickroom Wire Protocol - Tagged JSON text messages
//!
//! This crate implements the wire format spoken with the room server:
//! - One JSON object per message
//! - Discriminator field `$` naming the message kind
//! - Opaque post payloads carried as raw JSON values
//!
//! Unknown server tags decode to [`ServerMessage::Unknown`] so newer
//! servers never break older clients.

pub mod codec;
pub mod message;

pub use codec::*;
pub use message::*;
