//! In-process transport over tokio channels
//!
//! `channel_pair` yields the client's transport, the client's event
//! stream and the far end a server (or a simulated network) drives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tickroom_core::{TickroomError, TickroomResult};
use tokio::sync::mpsc;

use crate::{send_error, EventReceiver, Transport, TransportEvent};

/// Client side of an in-process connection
#[derive(Debug)]
pub struct ChannelTransport {
    open: Arc<AtomicBool>,
    outgoing: Mutex<Option<mpsc::Sender<String>>>,
}

/// Server side of an in-process connection
#[derive(Debug)]
pub struct ChannelPeer {
    handle: PeerHandle,
    incoming: mpsc::Receiver<String>,
}

/// Cloneable handle for pushing events to the client
#[derive(Clone, Debug)]
pub struct PeerHandle {
    open: Arc<AtomicBool>,
    events: mpsc::Sender<TransportEvent>,
}

/// Create a connected, not yet open, transport pair
///
/// `buffer` bounds both directions.
pub fn channel_pair(buffer: usize) -> (ChannelTransport, EventReceiver, ChannelPeer) {
    let buffer = buffer.max(1);
    let open = Arc::new(AtomicBool::new(false));
    let (out_tx, out_rx) = mpsc::channel(buffer);
    let (event_tx, event_rx) = mpsc::channel(buffer);

    let transport = ChannelTransport {
        open: Arc::clone(&open),
        outgoing: Mutex::new(Some(out_tx)),
    };
    let peer = ChannelPeer {
        handle: PeerHandle {
            open,
            events: event_tx,
        },
        incoming: out_rx,
    };
    (transport, event_rx, peer)
}

impl Transport for ChannelTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && self.outgoing.lock().is_some()
    }

    fn send(&self, text: String) -> TickroomResult<()> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TickroomError::NotConnected);
        }
        match self.outgoing.lock().as_ref() {
            Some(tx) => tx.try_send(text).map_err(send_error),
            None => Err(TickroomError::NotConnected),
        }
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
        self.outgoing.lock().take();
    }
}

impl ChannelPeer {
    pub fn handle(&self) -> PeerHandle {
        self.handle.clone()
    }

    /// Next message sent by the client; `None` once it closed
    pub async fn recv(&mut self) -> Option<String> {
        self.incoming.recv().await
    }

    /// Non-blocking receive
    pub fn try_recv(&mut self) -> Option<String> {
        self.incoming.try_recv().ok()
    }

    pub async fn open(&self) -> TickroomResult<()> {
        self.handle.open().await
    }

    pub async fn deliver(&self, text: String) -> TickroomResult<()> {
        self.handle.deliver(text).await
    }

    pub async fn disconnect(&self) {
        self.handle.disconnect().await
    }

    /// Split into the inbound queue and the event handle
    pub fn into_parts(self) -> (mpsc::Receiver<String>, PeerHandle) {
        (self.incoming, self.handle)
    }
}

impl PeerHandle {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Mark the connection open and notify the client
    pub async fn open(&self) -> TickroomResult<()> {
        self.open.store(true, Ordering::Release);
        self.push(TransportEvent::Open).await
    }

    /// Deliver one message to the client
    pub async fn deliver(&self, text: String) -> TickroomResult<()> {
        if !self.is_open() {
            return Err(TickroomError::NotConnected);
        }
        self.push(TransportEvent::Message(text)).await
    }

    /// Close the connection from the server side
    pub async fn disconnect(&self) {
        self.open.store(false, Ordering::Release);
        if self.push(TransportEvent::Closed).await.is_err() {
            tracing::trace!("client gone before disconnect");
        }
    }

    async fn push(&self, event: TransportEvent) -> TickroomResult<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| TickroomError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_before_open_fails() {
        let (transport, _events, _peer) = channel_pair(8);
        assert!(!transport.is_open());
        assert_eq!(
            transport.send("x".into()),
            Err(TickroomError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (transport, mut events, mut peer) = channel_pair(8);
        peer.open().await.unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::Open));
        assert!(transport.is_open());

        transport.send("ping".into()).unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("ping"));

        peer.deliver("pong".into()).await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Message("pong".into()))
        );
    }

    #[tokio::test]
    async fn test_full_buffer_is_transport_error() {
        let (transport, _events, peer) = channel_pair(1);
        peer.open().await.unwrap();
        transport.send("a".into()).unwrap();
        assert!(matches!(
            transport.send("b".into()),
            Err(TickroomError::TransportError(_))
        ));
    }

    #[tokio::test]
    async fn test_close_ends_peer_stream() {
        let (transport, _events, mut peer) = channel_pair(4);
        peer.open().await.unwrap();
        transport.send("last".into()).unwrap();
        transport.close();

        assert!(!transport.is_open());
        assert_eq!(transport.send("late".into()), Err(TickroomError::NotConnected));
        assert_eq!(peer.recv().await.as_deref(), Some("last"));
        assert_eq!(peer.recv().await, None);
    }

    #[tokio::test]
    async fn test_server_disconnect() {
        let (transport, mut events, peer) = channel_pair(4);
        peer.open().await.unwrap();
        peer.disconnect().await;

        assert_eq!(events.recv().await, Some(TransportEvent::Open));
        assert_eq!(events.recv().await, Some(TransportEvent::Closed));
        assert!(!transport.is_open());
        assert!(peer.deliver("x".into()).await.is_err());
    }
}
