//! Tickroom Transport Layer - Ordered text message delivery
//!
//! This crate provides:
//! - The `Transport` trait the client sends through
//! - In-process channel transport for tests and simulations
//! - Newline-delimited TCP transport

pub mod channel;
pub mod tcp;

pub use channel::*;
pub use tcp::*;

use tickroom_core::TickroomResult;
use tokio::sync::mpsc;

/// Connection lifecycle and inbound traffic, in arrival order
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection established; sends now succeed
    Open,
    /// One complete inbound message
    Message(String),
    /// Connection gone; no further events follow
    Closed,
}

/// Inbound event stream of a transport
pub type EventReceiver = mpsc::Receiver<TransportEvent>;

/// Outbound half of a message transport
///
/// Sends never block: a message either enters the outgoing buffer or
/// the call fails.
pub trait Transport: Send + Sync {
    fn is_open(&self) -> bool;

    /// Queue one message; `NotConnected` while the transport is not open
    fn send(&self, text: String) -> TickroomResult<()>;

    /// Stop sending; the peer observes the connection closing
    fn close(&self);
}

/// Map an outgoing-queue failure onto the error taxonomy
pub(crate) fn send_error<T>(err: mpsc::error::TrySendError<T>) -> tickroom_core::TickroomError {
    use tickroom_core::TickroomError;
    match err {
        mpsc::error::TrySendError::Full(_) => {
            TickroomError::TransportError("outgoing buffer full".into())
        }
        mpsc::error::TrySendError::Closed(_) => TickroomError::NotConnected,
    }
}
