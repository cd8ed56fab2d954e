//! Text codec - one JSON object per transport message

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tickroom_core::{Post, TickroomError, TickroomResult};

/// Serialize a message to its wire text
pub fn encode<M: Serialize>(message: &M) -> TickroomResult<String> {
    serde_json::to_string(message).map_err(|e| TickroomError::InvalidMessage(e.to_string()))
}

/// Parse wire text into a message
///
/// Text that is not JSON, or lacks the fields its tag requires, is an
/// `InvalidMessage`.
pub fn decode<M: DeserializeOwned>(text: &str) -> TickroomResult<M> {
    serde_json::from_str(text).map_err(|e| TickroomError::InvalidMessage(e.to_string()))
}

/// Encode an application payload for a `post` message
pub fn encode_payload<E: Serialize>(data: &E) -> TickroomResult<Value> {
    serde_json::to_value(data).map_err(|e| TickroomError::InvalidPayload(e.to_string()))
}

/// Re-type a confirmed post's raw payload into the application's event
pub fn decode_payload<E: DeserializeOwned>(post: Post<Value>) -> TickroomResult<Post<E>> {
    post.try_map_data(|data| serde_json::from_value(data).map_err(|e| e.to_string()))
        .map_err(TickroomError::InvalidPayload)
}
