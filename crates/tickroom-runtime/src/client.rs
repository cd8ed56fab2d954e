//! Client - one shared server connection
//!
//! Owns the clock estimator and the table of room watchers. The driver
//! loop (`run`) consumes transport events: it probes the clock when the
//! connection opens and then on a fixed period, and routes every
//! confirmed post to the room watching it.
//!
//! The internal lock is never held while user callbacks run or while
//! waiting on the network.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use tickroom_core::{
    Millis, NameSource, Post, PostName, RandomNames, RoomId, TickroomError, TickroomResult,
};
use tickroom_time::{ClockSync, LocalClock, SystemClock};
use tickroom_transport::{
    channel_pair, ChannelPeer, EventReceiver, TcpTransport, Transport, TransportEvent,
};
use tickroom_wire::{decode, encode, ClientMessage, ServerMessage};

use crate::ClientConfig;

/// Confirmed posts for one watched room, in arrival order
pub type PostReceiver = mpsc::UnboundedReceiver<Post<Value>>;

struct ClientState {
    sync: ClockSync,
    watchers: HashMap<RoomId, mpsc::UnboundedSender<Post<Value>>>,
    names: Box<dyn NameSource>,
}

struct ClientInner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn LocalClock>,
    state: Mutex<ClientState>,
    closed: AtomicBool,
    shutdown: Notify,
}

/// Shared connection handle; clones refer to the same connection
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

/// Non-owning client handle for callbacks stored inside the client
#[derive(Clone)]
pub(crate) struct WeakClient {
    inner: Weak<ClientInner>,
}

impl WeakClient {
    pub(crate) fn upgrade(&self) -> Option<Client> {
        self.inner.upgrade().map(|inner| Client { inner })
    }
}

impl Client {
    /// Client over `transport` with the system clock and random post names
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self::with_parts(transport, Arc::new(SystemClock), Box::new(RandomNames), config)
    }

    pub fn with_parts(
        transport: Arc<dyn Transport>,
        clock: Arc<dyn LocalClock>,
        names: Box<dyn NameSource>,
        config: ClientConfig,
    ) -> Self {
        Client {
            inner: Arc::new(ClientInner {
                config,
                transport,
                clock,
                state: Mutex::new(ClientState {
                    sync: ClockSync::new(),
                    watchers: HashMap::new(),
                    names,
                }),
                closed: AtomicBool::new(false),
                shutdown: Notify::new(),
            }),
        }
    }

    /// Connect over TCP and start the driver loop
    pub async fn connect_tcp(addr: SocketAddr, config: ClientConfig) -> TickroomResult<Self> {
        let (transport, events) = TcpTransport::connect(addr, config.outgoing_buffer).await?;
        let client = Client::new(Arc::new(transport), config);
        client.spawn_driver(events);
        tracing::info!(%addr, "connected");
        Ok(client)
    }

    /// In-process client; the returned peer plays the server
    ///
    /// Starts the driver loop, so it must be called inside a tokio runtime.
    pub fn connect_channel(
        clock: Arc<dyn LocalClock>,
        names: Box<dyn NameSource>,
        config: ClientConfig,
    ) -> (Self, ChannelPeer) {
        let (transport, events, peer) = channel_pair(config.outgoing_buffer);
        let client = Client::with_parts(Arc::new(transport), clock, names, config);
        client.spawn_driver(events);
        (client, peer)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub(crate) fn downgrade(&self) -> WeakClient {
        WeakClient {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Live handles to this connection, the driver's included
    #[cfg(test)]
    pub(crate) fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Run the driver loop on a background task
    pub fn spawn_driver(&self, events: EventReceiver) -> JoinHandle<()> {
        tokio::spawn(self.clone().run(events))
    }

    /// Driver loop; returns when the transport closes or the client does
    pub async fn run(self, mut events: EventReceiver) {
        let mut probes = tokio::time::interval(self.inner.config.clock.probe_interval);
        probes.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut opened = false;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Open) => {
                        tracing::info!("transport open");
                        opened = true;
                        probes.reset();
                        self.probe_or_log();
                    }
                    Some(TransportEvent::Message(text)) => self.handle_text(&text),
                    Some(TransportEvent::Closed) | None => {
                        tracing::info!("transport closed");
                        break;
                    }
                },
                _ = probes.tick(), if opened => self.probe_or_log(),
                _ = self.inner.shutdown.notified() => break,
            }
        }
    }

    fn probe_or_log(&self) {
        if let Err(e) = self.send_probe() {
            tracing::debug!(error = %e, "clock probe not sent");
        }
    }

    /// Send one `get_time` probe
    pub fn send_probe(&self) -> TickroomResult<()> {
        self.check_sendable()?;
        let now = self.inner.clock.now_ms();
        self.inner.state.lock().sync.begin_probe(now);
        self.send(&ClientMessage::GetTime)
    }

    /// Handle one inbound message's text
    ///
    /// Malformed text is logged and skipped.
    pub fn handle_text(&self, text: &str) {
        match decode::<ServerMessage>(text) {
            Ok(message) => self.handle_message(message),
            Err(e) => tracing::warn!(error = %e, "dropping malformed message"),
        }
    }

    pub fn handle_message(&self, message: ServerMessage) {
        match message {
            ServerMessage::InfoTime { time } => {
                let now = self.inner.clock.now_ms();
                let sample = self.inner.state.lock().sync.record_reply(time, now);
                if sample.is_first_sync() {
                    tracing::info!(rtt_ms = sample.round_trip, "clock synced");
                }
                sample.notify();
            }
            message @ ServerMessage::InfoPost { .. } => {
                let Some(post) = message.into_post() else {
                    return;
                };
                let state = self.inner.state.lock();
                match state.watchers.get(&post.room) {
                    Some(watcher) => {
                        let room = post.room.clone();
                        if watcher.send(post).is_err() {
                            tracing::debug!(%room, "watcher dropped, post discarded");
                        }
                    }
                    None => tracing::trace!(room = %post.room, "post for unwatched room"),
                }
            }
            ServerMessage::Unknown => tracing::trace!("ignoring unknown message kind"),
        }
    }

    fn check_sendable(&self) -> TickroomResult<()> {
        if self.is_closed() {
            return Err(TickroomError::Closed);
        }
        if !self.inner.transport.is_open() {
            return Err(TickroomError::NotConnected);
        }
        Ok(())
    }

    /// Encode and send one message
    pub fn send(&self, message: &ClientMessage) -> TickroomResult<()> {
        self.check_sendable()?;
        let text = encode(message)?;
        self.inner.transport.send(text)
    }

    /// Submit a post stamped with the current server time
    ///
    /// Returns the post as sent, still unconfirmed.
    pub fn post(&self, room: &RoomId, data: Value) -> TickroomResult<Post<Value>> {
        let time = self.server_time()?;
        let name = self.next_name();
        self.send(&ClientMessage::Post {
            room: room.clone(),
            time,
            name: name.clone(),
            data: data.clone(),
        })?;
        Ok(Post::local(room.clone(), time, name, data))
    }

    /// Request replay of `room` from sequence number `from`
    pub fn load(&self, room: &RoomId, from: u64) -> TickroomResult<()> {
        tracing::info!(%room, from, "loading room");
        self.send(&ClientMessage::Load {
            room: room.clone(),
            from,
        })
    }

    /// Register the room's watcher and subscribe to live posts
    ///
    /// A second watcher for the same room is refused.
    pub fn watch(&self, room: &RoomId) -> TickroomResult<PostReceiver> {
        let receiver = self.register_watcher(room)?;
        if let Err(e) = self.send_watch(room) {
            self.inner.state.lock().watchers.remove(room);
            return Err(e);
        }
        Ok(receiver)
    }

    /// Detach the room's watcher and unsubscribe
    pub fn unwatch(&self, room: &RoomId) -> TickroomResult<()> {
        self.inner.state.lock().watchers.remove(room);
        tracing::info!(%room, "unwatching room");
        self.send(&ClientMessage::Unwatch { room: room.clone() })
    }

    pub(crate) fn register_watcher(&self, room: &RoomId) -> TickroomResult<PostReceiver> {
        if self.is_closed() {
            return Err(TickroomError::Closed);
        }
        let mut state = self.inner.state.lock();
        if state.watchers.contains_key(room) {
            return Err(TickroomError::DuplicateSubscription(room.clone()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.watchers.insert(room.clone(), tx);
        Ok(rx)
    }

    pub(crate) fn send_watch(&self, room: &RoomId) -> TickroomResult<()> {
        tracing::info!(%room, "watching room");
        self.send(&ClientMessage::Watch { room: room.clone() })
    }

    pub fn is_watching(&self, room: &RoomId) -> bool {
        self.inner.state.lock().watchers.contains_key(room)
    }

    /// Close the connection; terminal
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.state.lock().watchers.clear();
        self.inner.transport.close();
        self.inner.shutdown.notify_one();
        tracing::info!("client closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn is_synced(&self) -> bool {
        self.inner.state.lock().sync.is_synced()
    }

    /// Current server time estimate; `NotSynced` before the first probe reply
    pub fn server_time(&self) -> TickroomResult<Millis> {
        let now = self.inner.clock.now_ms();
        self.inner.state.lock().sync.server_time(now)
    }

    /// Round trip of the most recent probe
    pub fn ping(&self) -> Option<Millis> {
        self.inner.state.lock().sync.estimated_ping()
    }

    /// Run `listener` once the clock is synced, immediately if it already is
    pub fn on_sync(&self, listener: impl FnOnce() + Send + 'static) {
        {
            let mut state = self.inner.state.lock();
            if !state.sync.is_synced() {
                state.sync.on_sync(Box::new(listener));
                return;
            }
        }
        listener();
    }

    fn next_name(&self) -> PostName {
        self.inner.state.lock().names.next_name()
    }
}
