//! Error types for the transport layer.

use std::io;
use std::path::PathBuf;

/// Errors that can occur while moving text frames over a connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The local listener couldn't bind its address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Accepting a TCP connection failed.
    #[error("failed to accept client: {0}")]
    Accept(#[source] io::Error),

    /// A client's TLS handshake or WebSocket upgrade failed.
    #[error("client handshake failed: {0}")]
    Handshake(String),

    /// TLS certificate or key material is unusable.
    #[error("bad TLS material in {}: {reason}", path.display())]
    Certificate { path: PathBuf, reason: String },

    /// Dialing the chat service failed.
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: io::Error,
    },

    /// The peer is gone, or this side already closed.
    #[error("connection closed: {0}")]
    Closed(String),

    #[error("failed to write frame: {0}")]
    Write(#[source] io::Error),

    #[error("failed to read frame: {0}")]
    Read(#[source] io::Error),

    /// A binary frame that isn't valid UTF-8.
    #[error("frame is not text: {0}")]
    NotText(#[source] std::string::FromUtf8Error),

    /// A writer panicked while holding the connection's lock.
    #[error("connection state poisoned")]
    Poisoned,
}

impl TransportError {
    #[cfg(feature = "websocket")]
    pub(crate) fn certificate(
        path: impl AsRef<std::path::Path>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Certificate {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }
}
