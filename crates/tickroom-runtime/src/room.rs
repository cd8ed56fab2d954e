//! Room - per-room engine bound to a shared client

use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use tickroom_core::{Millis, Post, PostName, RoomId, Tick, TickroomResult};
use tickroom_state::{ReconciliationEngine, RoomConfig, Simulation};
use tickroom_wire::{decode_payload, encode_payload};

use crate::{Client, PostReceiver};

/// One room's simulation, kept in step with the server
///
/// Queries and submits first fold in every confirmed post delivered
/// since the last call, so each answer reflects all input received so
/// far. Delivered posts wait in an unbounded inbox until then, so a room
/// nobody queries keeps buffering.
///
/// Dropping the room detaches its watcher and unsubscribes, as `leave`
/// does.
pub struct Room<S: Simulation> {
    id: RoomId,
    client: Client,
    engine: ReconciliationEngine<S>,
    inbox: PostReceiver,
    bootstrap_error: Arc<Mutex<Option<tickroom_core::TickroomError>>>,
    detached: bool,
}

impl<S> Room<S>
where
    S: Simulation,
    S::Event: Serialize + DeserializeOwned,
{
    /// Join `room` through `client`
    ///
    /// Once the clock is synced (immediately if it already is) the room
    /// subscribes and replays its history from sequence 0. Fails if
    /// another watcher already holds the room.
    pub fn join(
        client: &Client,
        room: impl Into<RoomId>,
        simulation: S,
        config: RoomConfig,
    ) -> TickroomResult<Self> {
        let id = room.into();
        let inbox = client.register_watcher(&id)?;
        let bootstrap_error = Arc::new(Mutex::new(None));

        // The listener lives inside the client, so it holds neither the
        // client nor the room strongly
        let bootstrap_client = client.downgrade();
        let bootstrap_room = id.clone();
        let bootstrap_slot = Arc::downgrade(&bootstrap_error);
        client.on_sync(move || {
            let (Some(client), Some(slot)) = (bootstrap_client.upgrade(), bootstrap_slot.upgrade())
            else {
                return;
            };
            let result = client
                .send_watch(&bootstrap_room)
                .and_then(|()| client.load(&bootstrap_room, 0));
            if let Err(e) = result {
                tracing::warn!(room = %bootstrap_room, error = %e, "room bootstrap failed");
                *slot.lock() = Some(e);
            }
        });

        Ok(Room {
            id,
            client: client.clone(),
            engine: ReconciliationEngine::new(simulation, config),
            inbox,
            bootstrap_error,
            detached: false,
        })
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn engine(&self) -> &ReconciliationEngine<S> {
        &self.engine
    }

    /// Error from the watch/load bootstrap, if it failed
    pub fn bootstrap_error(&self) -> Option<tickroom_core::TickroomError> {
        self.bootstrap_error.lock().clone()
    }

    /// Fold delivered confirmed posts into the engine
    ///
    /// Returns how many were accepted. Posts whose payload does not decode
    /// as `S::Event` are logged and skipped.
    pub fn sync_inbox(&mut self) -> usize {
        let mut accepted = 0;
        while let Ok(post) = self.inbox.try_recv() {
            let index = post.index;
            match decode_payload::<S::Event>(post) {
                Ok(post) => {
                    self.engine.receive_confirmed(post);
                    accepted += 1;
                }
                Err(e) => {
                    tracing::warn!(room = %self.id, ?index, error = %e, "skipping undecodable post");
                }
            }
        }
        accepted
    }

    /// Post `data`, predicting it locally until confirmed
    ///
    /// The prediction is recorded only once the send succeeded.
    pub fn submit(&mut self, data: S::Event) -> TickroomResult<PostName> {
        self.sync_inbox();
        let payload = encode_payload(&data)?;
        let sent = self.client.post(&self.id, payload)?;
        let name = sent.name.clone();
        self.engine
            .add_local_post(Post::local(self.id.clone(), sent.server_time, sent.name, data));
        tracing::trace!(room = %self.id, %name, "local post submitted");
        Ok(name)
    }

    pub fn state_at(&mut self, tick: Tick) -> S::State {
        self.sync_inbox();
        self.engine.state_at(tick)
    }

    /// Tick of the current server time estimate
    pub fn current_tick(&self) -> TickroomResult<Tick> {
        Ok(self.engine.time_to_tick(self.client.server_time()?))
    }

    pub fn current_state(&mut self) -> TickroomResult<S::State> {
        let tick = self.current_tick()?;
        Ok(self.state_at(tick))
    }

    /// Smoothed state for display at the current tick
    pub fn render_state(&mut self) -> TickroomResult<S::Render> {
        let tick = self.current_tick()?;
        self.sync_inbox();
        Ok(self.engine.render_state(tick, self.client.ping()))
    }

    /// `None` until the room's first post (index 0) has arrived
    pub fn initial_tick(&mut self) -> Option<Tick> {
        self.sync_inbox();
        self.engine.initial_tick()
    }

    pub fn initial_time(&mut self) -> Option<Millis> {
        self.sync_inbox();
        self.engine.initial_time()
    }

    /// Confirmed posts currently retained
    pub fn confirmed_count(&mut self) -> usize {
        self.sync_inbox();
        self.engine.confirmed_count()
    }

    /// Stop watching the room
    pub fn leave(mut self) -> TickroomResult<()> {
        self.detach()
    }
}

impl<S: Simulation> Room<S> {
    fn detach(&mut self) -> TickroomResult<()> {
        if std::mem::replace(&mut self.detached, true) {
            return Ok(());
        }
        self.client.unwatch(&self.id)
    }
}

impl<S: Simulation> Drop for Room<S> {
    fn drop(&mut self) {
        if let Err(e) = self.detach() {
            tracing::debug!(room = %self.id, error = %e, "unwatch on drop not sent");
        }
    }
}
