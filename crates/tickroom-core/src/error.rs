//! Error types for tickroom

use thiserror::Error;

use crate::RoomId;

/// Core tickroom errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TickroomError {
    // Clock errors
    #[error("Server time requested before initial clock sync")]
    NotSynced,

    // Transport errors
    #[error("Transport not open")]
    NotConnected,

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Client closed")]
    Closed,

    // Subscription errors
    #[error("Handler already registered for room: {0}")]
    DuplicateSubscription(RoomId),

    // Wire errors
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Invalid post payload: {0}")]
    InvalidPayload(String),
}

/// Result type for tickroom operations
pub type TickroomResult<T> = Result<T, TickroomError>;
