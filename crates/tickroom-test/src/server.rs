//! Simulated authoritative room server
//!
//! Assigns each room's posts consecutive indices from 0, stamps them
//! with its own receipt time, answers clock probes and load requests,
//! and fans confirmed posts out to watchers.
//!
//! `SimulatedServer` is a plain state machine over wire text. `ChannelHub`
//! drives it behind in-process transports for real `Client`s.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use tickroom_core::{Millis, NameSource, Post, RoomId, TickroomResult};
use tickroom_runtime::{Client, ClientConfig};
use tickroom_time::LocalClock;
use tickroom_transport::PeerHandle;
use tickroom_wire::{decode, encode, ClientMessage, ServerMessage};

/// Connection identity on the server
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub usize);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Messages to deliver, by recipient
pub type Outbox = Vec<(ConnectionId, String)>;

#[derive(Default)]
struct RoomLog {
    posts: Vec<Post<Value>>,
    watchers: BTreeSet<ConnectionId>,
}

/// Authoritative server state
#[derive(Default)]
pub struct SimulatedServer {
    rooms: HashMap<RoomId, RoomLog>,
}

impl SimulatedServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Confirmed posts of `room`, in index order
    pub fn posts(&self, room: &RoomId) -> &[Post<Value>] {
        self.rooms.get(room).map_or(&[], |log| log.posts.as_slice())
    }

    pub fn post_count(&self, room: &RoomId) -> usize {
        self.posts(room).len()
    }

    pub fn watchers(&self, room: &RoomId) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|log| log.watchers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Process one message from `from`, received at server time `now`
    ///
    /// Malformed text is logged and produces no reply.
    pub fn handle(&mut self, from: ConnectionId, text: &str, now: Millis) -> Outbox {
        let message = match decode::<ClientMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(%from, error = %e, "server dropping malformed message");
                return Vec::new();
            }
        };

        let mut outbox = Vec::new();
        match message {
            ClientMessage::GetTime => {
                push(&mut outbox, from, &ServerMessage::InfoTime { time: now });
            }
            ClientMessage::Post {
                room,
                time,
                name,
                data,
            } => {
                let log = self.rooms.entry(room.clone()).or_default();
                let index = log.posts.len() as u64;
                let post = Post::confirmed(room.clone(), index, now, time, name, data);
                log.posts.push(post.clone());
                tracing::debug!(%room, index, "post confirmed");

                if let Some(message) = ServerMessage::from_post(post) {
                    for watcher in &log.watchers {
                        push(&mut outbox, *watcher, &message);
                    }
                }
            }
            ClientMessage::Load { room, from: start } => {
                let posts = self.posts(&room);
                let start = usize::try_from(start).unwrap_or(usize::MAX).min(posts.len());
                for post in &posts[start..] {
                    if let Some(message) = ServerMessage::from_post(post.clone()) {
                        push(&mut outbox, from, &message);
                    }
                }
            }
            ClientMessage::Watch { room } => {
                self.rooms.entry(room).or_default().watchers.insert(from);
            }
            ClientMessage::Unwatch { room } => {
                if let Some(log) = self.rooms.get_mut(&room) {
                    log.watchers.remove(&from);
                }
            }
        }
        outbox
    }

    /// Forget every subscription held by `connection`
    pub fn disconnect(&mut self, connection: ConnectionId) {
        for log in self.rooms.values_mut() {
            log.watchers.remove(&connection);
        }
    }
}

fn push(outbox: &mut Outbox, to: ConnectionId, message: &ServerMessage) {
    match encode(message) {
        Ok(text) => outbox.push((to, text)),
        Err(e) => tracing::warn!(%to, error = %e, "server failed to encode reply"),
    }
}

/// Serves a `SimulatedServer` to in-process clients
///
/// Must be used inside a tokio runtime.
pub struct ChannelHub {
    server: Arc<Mutex<SimulatedServer>>,
    clock: Arc<dyn LocalClock>,
    peers: Arc<Mutex<HashMap<ConnectionId, PeerHandle>>>,
    next_id: AtomicUsize,
}

impl ChannelHub {
    /// Hub whose server reads time from `clock`
    pub fn new(clock: Arc<dyn LocalClock>) -> Self {
        ChannelHub {
            server: Arc::new(Mutex::new(SimulatedServer::new())),
            clock,
            peers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicUsize::new(0),
        }
    }

    pub fn server(&self) -> Arc<Mutex<SimulatedServer>> {
        Arc::clone(&self.server)
    }

    /// Connect a new client and open its connection
    pub async fn connect(
        &self,
        clock: Arc<dyn LocalClock>,
        names: Box<dyn NameSource>,
        config: ClientConfig,
    ) -> TickroomResult<Client> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (client, peer) = Client::connect_channel(clock, names, config);
        let (mut incoming, handle) = peer.into_parts();
        self.peers.lock().insert(id, handle.clone());

        let server = Arc::clone(&self.server);
        let peers = Arc::clone(&self.peers);
        let server_clock = Arc::clone(&self.clock);
        tokio::spawn(async move {
            while let Some(text) = incoming.recv().await {
                let outbox = server.lock().handle(id, &text, server_clock.now_ms());
                for (to, reply) in outbox {
                    let target = peers.lock().get(&to).cloned();
                    let Some(target) = target else {
                        continue;
                    };
                    if target.deliver(reply).await.is_err() {
                        peers.lock().remove(&to);
                        server.lock().disconnect(to);
                    }
                }
            }
            tracing::debug!(%id, "connection closed");
            peers.lock().remove(&id);
            server.lock().disconnect(id);
        });

        handle.open().await?;
        Ok(client)
    }
}
