//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! The same [`WebSocketConnection`] type wraps both sides of the bouncer:
//! local clients on a [`ClientStream`] (plain, or TLS when the listener
//! has a certificate), and the (possibly TLS) stream dialed to the chat
//! service.

use std::io;
use std::net::SocketAddr;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{
    ClientStream, Connection, ConnectionId, Handshake, TlsAcceptor,
    Transport, TransportError,
};

/// Stream type of an upstream connection (`ws://` or `wss://`).
pub type UpstreamStream = MaybeTlsStream<TcpStream>;

/// A WebSocket-based [`Transport`] that listens for local clients.
pub struct WebSocketTransport {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| {
            TransportError::Bind {
                addr: addr.to_owned(),
                source,
            }
        })?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self {
            listener,
            tls: None,
        })
    }

    /// Serves `wss://` instead of `ws://`.
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        tracing::info!("TLS enabled on local listener");
        self.tls = Some(acceptor);
        self
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection<ClientStream>;
    type Incoming = IncomingConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<IncomingConnection, Self::Error> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::Accept)?;
        tracing::debug!(%addr, "accepted TCP connection");
        Ok(IncomingConnection {
            stream,
            addr,
            tls: self.tls.clone(),
        })
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// A local client's socket, before its TLS and WebSocket handshakes.
///
/// Dropping it closes the socket.
pub struct IncomingConnection {
    stream: TcpStream,
    addr: SocketAddr,
    tls: Option<TlsAcceptor>,
}

impl IncomingConnection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Handshake for IncomingConnection {
    type Connection = WebSocketConnection<ClientStream>;
    type Error = TransportError;

    async fn handshake(self) -> Result<Self::Connection, Self::Error> {
        let stream = match &self.tls {
            Some(acceptor) => {
                ClientStream::Tls(Box::new(acceptor.accept(self.stream).await?))
            }
            None => ClientStream::Plain(self.stream),
        };

        let encrypted = stream.is_encrypted();

        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        let conn = WebSocketConnection::new(ws);
        tracing::debug!(id = %conn.id, addr = %self.addr, encrypted, "accepted WebSocket connection");
        Ok(conn)
    }
}

/// Dials the chat service and returns an upstream connection.
pub async fn connect(
    url: &str,
) -> Result<WebSocketConnection<UpstreamStream>, TransportError> {
    let (ws, _response) =
        tokio_tungstenite::connect_async(url).await.map_err(|e| {
            TransportError::Connect {
                url: url.to_owned(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, e),
            }
        })?;
    let conn = WebSocketConnection::new(ws);
    tracing::debug!(id = %conn.id, url, "upstream WebSocket connected");
    Ok(conn)
}

/// A single WebSocket connection.
///
/// The socket is split into independently locked halves so a task parked
/// in [`recv`](Connection::recv) never blocks writers fanning frames out.
pub struct WebSocketConnection<S = ClientStream> {
    id: ConnectionId,
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    stream: Mutex<SplitStream<WebSocketStream<S>>>,
}

impl<S> WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn new(ws: WebSocketStream<S>) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id: ConnectionId::next(),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }
}

impl<S> Connection for WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Error = TransportError;

    async fn send(&self, text: &str) -> Result<(), Self::Error> {
        let msg = Message::text(text.to_owned());
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::Write(io::Error::new(
                io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    async fn recv(&self) -> Result<Option<String>, Self::Error> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(data))) => {
                    return String::from_utf8(data.to_vec())
                        .map(Some)
                        .map_err(TransportError::NotText);
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // ping/pong/raw frame
                Some(Err(e)) => {
                    return Err(TransportError::Read(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.sink.lock().await.close().await.map_err(|e| {
            TransportError::Write(io::Error::new(
                io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
