//! TCP transport - one message per `\n`-terminated line

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tickroom_core::{TickroomError, TickroomResult};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::{send_error, EventReceiver, Transport, TransportEvent};

/// Newline-delimited TCP transport
pub struct TcpTransport {
    open: Arc<AtomicBool>,
    outgoing: Mutex<Option<mpsc::Sender<String>>>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl TcpTransport {
    /// Connect to a server
    pub async fn connect(addr: SocketAddr, buffer: usize) -> TickroomResult<(Self, EventReceiver)> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TickroomError::TransportError(e.to_string()))?;
        Self::from_stream(stream, buffer)
    }

    /// Wrap an established stream
    ///
    /// Spawns the read and write loops; must run inside a tokio runtime.
    /// The returned stream starts with `TransportEvent::Open`.
    pub fn from_stream(stream: TcpStream, buffer: usize) -> TickroomResult<(Self, EventReceiver)> {
        let buffer = buffer.max(1);
        let local_addr = stream
            .local_addr()
            .map_err(|e| TickroomError::TransportError(e.to_string()))?;
        let peer_addr = stream
            .peer_addr()
            .map_err(|e| TickroomError::TransportError(e.to_string()))?;

        let (read_half, write_half) = stream.into_split();
        let open = Arc::new(AtomicBool::new(true));
        let (out_tx, out_rx) = mpsc::channel(buffer);
        let (event_tx, event_rx) = mpsc::channel(buffer);

        event_tx
            .try_send(TransportEvent::Open)
            .map_err(|_| TickroomError::NotConnected)?;
        start_read_loop(read_half, event_tx, Arc::clone(&open));
        start_write_loop(write_half, out_rx, Arc::clone(&open));

        let transport = TcpTransport {
            open,
            outgoing: Mutex::new(Some(out_tx)),
            local_addr,
            peer_addr,
        };
        Ok((transport, event_rx))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl Transport for TcpTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && self.outgoing.lock().is_some()
    }

    fn send(&self, text: String) -> TickroomResult<()> {
        if text.contains('\n') {
            return Err(TickroomError::InvalidMessage("message contains a line break".into()));
        }
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
        // Dropping the sender ends the write loop, which shuts the socket down
        self.outgoing.lock().take();
    }
}

fn start_read_loop(read_half: OwnedReadHalf, events: mpsc::Sender<TransportEvent>, open: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(read_half).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.is_empty() {
                        continue;
                    }
                    if events.send(TransportEvent::Message(line)).await.is_err() {
                        break; // Receiver dropped
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("TCP receive error: {}", e);
                    break;
                }
            }
        }
        open.store(false, Ordering::Release);
        let _ = events.send(TransportEvent::Closed).await;
    });
}

fn start_write_loop(mut write_half: OwnedWriteHalf, mut outgoing: mpsc::Receiver<String>, open: Arc<AtomicBool>) {
    tokio::spawn(async move {
        while let Some(text) = outgoing.recv().await {
            let mut line = text.into_bytes();
            line.push(b'\n');
            if let Err(e) = write_half.write_all(&line).await {
                tracing::warn!("TCP send error: {}", e);
                break;
            }
        }
        open.store(false, Ordering::Release);
        let _ = write_half.shutdown().await;
    });
}
