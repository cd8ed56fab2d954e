//! Post definitions
//!
//! A post is a timestamped unit of input injected into a room's
//! simulation. Confirmed posts carry the server's sequence number;
//! locally predicted posts carry none until their confirmed copy
//! arrives.

use serde::{Deserialize, Serialize};

use crate::{Millis, PostName, RoomId};

/// Timestamped room input
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Post<D> {
    /// Room the post belongs to
    pub room: RoomId,
    /// Server sequence number; `None` for a local, unconfirmed post
    pub index: Option<u64>,
    /// Server receipt time
    pub server_time: Millis,
    /// Time the submitting client claims the post happened
    pub client_time: Millis,
    /// Client-generated correlation id
    pub name: PostName,
    /// Opaque payload handed to the simulation
    pub data: D,
}

impl<D> Post<D> {
    /// A server-confirmed post
    pub fn confirmed(
        room: RoomId,
        index: u64,
        server_time: Millis,
        client_time: Millis,
        name: PostName,
        data: D,
    ) -> Self {
        Post {
            room,
            index: Some(index),
            server_time,
            client_time,
            name,
            data,
        }
    }

    /// A locally predicted post stamped at `time` on the server clock
    pub fn local(room: RoomId, time: Millis, name: PostName, data: D) -> Self {
        Post {
            room,
            index: None,
            server_time: time,
            client_time: time,
            name,
            data,
        }
    }

    #[inline]
    pub fn is_confirmed(&self) -> bool {
        self.index.is_some()
    }

    /// Re-type the payload, keeping every other field
    pub fn try_map_data<E, F>(self, f: F) -> Result<Post<E>, String>
    where
        F: FnOnce(D) -> Result<E, String>,
    {
        Ok(Post {
            room: self.room,
            index: self.index,
            server_time: self.server_time,
            client_time: self.client_time,
            name: self.name,
            data: f(self.data)?,
        })
    }
}
