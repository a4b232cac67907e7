//! Transport abstraction layer for chatbnc.
//!
//! Provides the [`Transport`] and [`Connection`] traits that abstract over
//! how text frames reach us. The bouncer sits on both ends of a WebSocket:
//! local clients connect *to* it ([`WebSocketTransport`]), and it dials *out*
//! to the chat service once per managed character ([`connect`]).
//!
//! The chat protocol is line-oriented text, so connections exchange
//! `String`s rather than byte buffers.
//!
//! Accepting is split in two. [`Transport::accept`] only takes the socket;
//! the TLS and WebSocket handshakes run in [`Handshake::handshake`], which
//! callers drive on the connection's own task, so a peer that never
//! finishes its handshake holds up nobody else.
//!
//! # Feature Flags
//!
//! - `websocket` (default) — WebSocket transport via `tokio-tungstenite`

mod error;
mod memory;
#[cfg(feature = "websocket")]
mod tls;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use memory::{MemoryConnection, MemoryPeer, memory_pair};
#[cfg(feature = "websocket")]
pub use tls::{ClientStream, TlsAcceptor};
#[cfg(feature = "websocket")]
pub use websocket::{
    IncomingConnection, UpstreamStream, WebSocketConnection,
    WebSocketTransport, connect,
};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating unique connection IDs across every transport.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-wide unique id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// A socket that has been accepted but not yet upgraded.
    type Incoming: Handshake<Connection = Self::Connection, Error = Self::Error>;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming socket.
    ///
    /// Returns as soon as the socket is accepted; nothing is read from
    /// the peer here.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Incoming, Self::Error>> + Send;

    /// Gracefully shuts down the transport, stopping new connections.
    fn shutdown(
        &self,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// The protocol handshakes still owed on an accepted socket.
pub trait Handshake: Send + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    /// Completes the handshakes and yields the connection. Never bounded
    /// by a deadline itself; wrap it in one.
    fn handshake(
        self,
    ) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;
}

/// A single connection that carries text frames in both directions.
///
/// The futures are `Send` so sessions generic over the connection type
/// can still be spawned onto the multi-threaded runtime.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends one text frame to the remote peer.
    fn send(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next text frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
