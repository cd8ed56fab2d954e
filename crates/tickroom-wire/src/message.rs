//! Message definitions for both directions of the wire

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tickroom_core::{Millis, Post, PostName, RoomId};

/// Discriminator field carried by every message
pub const TAG_FIELD: &str = "$";

/// Messages sent by a client
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Request a clock probe reply
    GetTime,

    /// Submit a post; `time` is the client's claimed server-clock time
    Post {
        room: RoomId,
        time: Millis,
        name: PostName,
        data: Value,
    },

    /// Replay confirmed posts from sequence number `from`
    Load { room: RoomId, from: u64 },

    /// Subscribe to live confirmed posts
    Watch { room: RoomId },

    Unwatch { room: RoomId },
}

impl ClientMessage {
    /// Tag value as it appears on the wire
    pub fn tag(&self) -> &'static str {
        match self {
            ClientMessage::GetTime => "get_time",
            ClientMessage::Post { .. } => "post",
            ClientMessage::Load { .. } => "load",
            ClientMessage::Watch { .. } => "watch",
            ClientMessage::Unwatch { .. } => "unwatch",
        }
    }

    /// Room the message addresses, if any
    pub fn room(&self) -> Option<&RoomId> {
        match self {
            ClientMessage::GetTime => None,
            ClientMessage::Post { room, .. }
            | ClientMessage::Load { room, .. }
            | ClientMessage::Watch { room }
            | ClientMessage::Unwatch { room } => Some(room),
        }
    }
}

/// Messages sent by the server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Server clock at the moment of reply
    InfoTime { time: Millis },

    /// A confirmed post, for both `load` replays and live `watch` updates
    InfoPost {
        room: RoomId,
        index: u64,
        server_time: Millis,
        client_time: Millis,
        #[serde(default)]
        name: PostName,
        data: Value,
    },

    /// Any tag this client does not understand
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// The confirmed post carried by an `info_post`
    pub fn into_post(self) -> Option<Post<Value>> {
        match self {
            ServerMessage::InfoPost {
                room,
                index,
                server_time,
                client_time,
                name,
                data,
            } => Some(Post::confirmed(
                room,
                index,
                server_time,
                client_time,
                name,
                data,
            )),
            _ => None,
        }
    }

    /// Wrap a confirmed post for delivery
    ///
    /// Returns `None` for a post without an index.
    pub fn from_post(post: Post<Value>) -> Option<Self> {
        Some(ServerMessage::InfoPost {
            index: post.index?,
            room: post.room,
            server_time: post.server_time,
            client_time: post.client_time,
            name: post.name,
            data: post.data,
        })
    }
}
