//! How an upstream session opens its socket to the chat service.

use std::future::Future;

use chatbnc_transport::{Connection, UpstreamStream, WebSocketConnection};

use crate::UpstreamError;

/// Opens one upstream connection per call.
///
/// Sessions only need *some* [`Connection`]; tests hand out in-memory
/// pairs instead of dialing out.
pub trait UpstreamConnector: Send + Sync + 'static {
    type Connection: Connection;

    /// Dials the chat service.
    ///
    /// # Errors
    /// Returns `UpstreamError::Transport` if the connection can't be made.
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, UpstreamError>> + Send;
}

/// [`UpstreamConnector`] that dials a `ws://` or `wss://` URL.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl UpstreamConnector for WebSocketConnector {
    type Connection = WebSocketConnection<UpstreamStream>;

    async fn connect(&self) -> Result<Self::Connection, UpstreamError> {
        Ok(chatbnc_transport::connect(&self.url).await?)
    }
}
