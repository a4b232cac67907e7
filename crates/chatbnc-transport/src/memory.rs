//! In-process connection pair backed by channels.
//!
//! [`memory_pair`] returns a [`MemoryConnection`] (what the bouncer sees)
//! and a [`MemoryPeer`] (the far end, driven by whoever plays the chat
//! service or the client). Sessions and handlers are generic over
//! [`Connection`], so this lets them run without sockets.

use tokio::sync::{Mutex, mpsc};

use crate::{Connection, ConnectionId, TransportError};

/// Creates a connected in-memory pair.
pub fn memory_pair() -> (MemoryConnection, MemoryPeer) {
    let (to_peer_tx, to_peer_rx) = mpsc::unbounded_channel();
    let (to_conn_tx, to_conn_rx) = mpsc::unbounded_channel();
    let conn = MemoryConnection {
        id: ConnectionId::next(),
        outbound: std::sync::Mutex::new(Some(to_peer_tx)),
        inbound: Mutex::new(to_conn_rx),
    };
    let peer = MemoryPeer {
        inbound: to_peer_rx,
        outbound: Some(to_conn_tx),
    };
    (conn, peer)
}

/// The bouncer-side half of a [`memory_pair`].
pub struct MemoryConnection {
    id: ConnectionId,
    outbound: std::sync::Mutex<Option<mpsc::UnboundedSender<String>>>,
    inbound: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl Connection for MemoryConnection {
    type Error = TransportError;

    async fn send(&self, text: &str) -> Result<(), Self::Error> {
        let guard = self
            .outbound
            .lock()
            .map_err(|_| TransportError::Poisoned)?;
        match guard.as_ref() {
            Some(tx) => tx.send(text.to_owned()).map_err(|_| {
                TransportError::Closed("peer dropped".into())
            }),
            None => Err(TransportError::Closed(
                "closed locally".into(),
            )),
        }
    }

    async fn recv(&self) -> Result<Option<String>, Self::Error> {
        Ok(self.inbound.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        if let Ok(mut guard) = self.outbound.lock() {
            guard.take();
        }
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// The far end of a [`memory_pair`].
pub struct MemoryPeer {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

impl MemoryPeer {
    /// Sends a frame to the connection. Returns `false` once either side
    /// has gone away.
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.outbound
            .as_ref()
            .is_some_and(|tx| tx.send(text.into()).is_ok())
    }

    /// Waits for the next frame the connection sent. `None` means the
    /// connection was closed or dropped.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Returns a frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<String> {
        self.inbound.try_recv().ok()
    }

    /// Closes the peer side; the connection's `recv` then yields `None`.
    pub fn close(&mut self) {
        self.outbound.take();
    }
}
