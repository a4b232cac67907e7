//! `Bouncer` builder and accept loop.
//!
//! This is the entry point for running chatbnc. It ties the layers
//! together: transport → protocol → session (identification) → upstream.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chatbnc_session::{
    Authenticator, IDENTIFY_TIMEOUT, KEEPALIVE_INTERVAL, TicketAuthenticator,
};
use chatbnc_transport::{
    Handshake, IncomingConnection, TlsAcceptor, Transport, WebSocketTransport,
};
use chatbnc_upstream::{
    ApiTicketProvider, FileLogger, MessageLogger, NoopLogger, SessionPool,
    WebSocketConnector,
};
use tokio::time::Instant;

use crate::handler::handle_connection;
use crate::{BouncerError, Config};

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<A: Authenticator> {
    pub(crate) pool: SessionPool,
    pub(crate) auth: A,
    pub(crate) account: String,
    pub(crate) characters: Vec<String>,
    pub(crate) identify_timeout: Duration,
    pub(crate) keepalive_interval: Duration,
}

/// Builder for configuring and starting a bouncer.
///
/// # Example
///
/// ```rust,ignore
/// use chatbnc::prelude::*;
///
/// let bouncer = Bouncer::builder()
///     .bind("127.0.0.1:8722")
///     .build("myaccount", pool, TicketAuthenticator::default())
///     .await?;
/// bouncer.run().await
/// ```
pub struct BouncerBuilder {
    bind_addr: String,
    tls: Option<(PathBuf, PathBuf)>,
    identify_timeout: Duration,
    keepalive_interval: Duration,
}

impl BouncerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8722".to_string(),
            tls: None,
            identify_timeout: IDENTIFY_TIMEOUT,
            keepalive_interval: KEEPALIVE_INTERVAL,
        }
    }

    /// Sets the address to listen on.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Serves `wss://` with the given PEM certificate chain and key.
    pub fn tls(
        mut self,
        cert_file: impl Into<PathBuf>,
        key_file: impl Into<PathBuf>,
    ) -> Self {
        self.tls = Some((cert_file.into(), key_file.into()));
        self
    }

    /// How long a new client has to identify before it's dropped. The
    /// clock starts when the socket is accepted, so it also bounds the
    /// TLS and WebSocket handshakes.
    pub fn identify_timeout(mut self, timeout: Duration) -> Self {
        self.identify_timeout = timeout;
        self
    }

    /// How often identified clients are sent `PIN`.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Binds the listener. Clients identify against `account` and may pick
    /// any character `pool` manages.
    pub async fn build<A: Authenticator>(
        self,
        account: impl Into<String>,
        pool: SessionPool,
        auth: A,
    ) -> Result<Bouncer<A>, BouncerError> {
        let acceptor = match &self.tls {
            Some((cert, key)) => Some(TlsAcceptor::from_pem_files(cert, key)?),
            None => None,
        };
        let mut transport = WebSocketTransport::bind(&self.bind_addr).await?;
        if let Some(acceptor) = acceptor {
            transport = transport.with_tls(acceptor);
        }

        let characters = pool.identities().map(str::to_owned).collect();
        let state = Arc::new(ServerState {
            pool,
            auth,
            account: account.into(),
            characters,
            identify_timeout: self.identify_timeout,
            keepalive_interval: self.keepalive_interval,
        });

        Ok(Bouncer { transport, state })
    }
}

impl Default for BouncerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound bouncer.
///
/// Call [`run()`](Self::run) to start accepting clients.
pub struct Bouncer<A: Authenticator> {
    transport: WebSocketTransport,
    state: Arc<ServerState<A>>,
}

impl Bouncer<TicketAuthenticator> {
    /// Starts one upstream session per configured character and binds the
    /// local listener, wired to the real chat service.
    pub async fn from_config(config: &Config) -> Result<Self, BouncerError> {
        config.validate()?;

        let logger: Arc<dyn MessageLogger> = match &config.log_directory {
            Some(dir) => Arc::new(FileLogger::new(dir)),
            None => Arc::new(NoopLogger),
        };
        let pool = SessionPool::start(
            &config.characters,
            &config.session_config(),
            Arc::new(WebSocketConnector::new(&config.host)),
            Arc::new(ApiTicketProvider::new(
                &config.ticket_url,
                &config.account,
                &config.password,
            )),
            logger,
        )?;

        let mut builder = BouncerBuilder::new().bind(&config.listen_addr());
        if let (Some(cert), Some(key)) = (&config.cert_file, &config.key_file) {
            builder = builder.tls(cert, key);
        }
        let built = builder
            .build(
                config.account.clone(),
                pool.clone(),
                TicketAuthenticator::new(&config.auth_url),
            )
            .await;
        if built.is_err() {
            pool.shutdown().await;
        }
        built
    }
}

impl<A: Authenticator> Bouncer<A> {
    /// Creates a new builder.
    pub fn builder() -> BouncerBuilder {
        BouncerBuilder::new()
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The upstream sessions clients attach to.
    pub fn pool(&self) -> &SessionPool {
        &self.state.pool
    }

    /// Runs the accept loop.
    ///
    /// Spawns a task for each accepted socket; the handshakes and the
    /// handler run there. Runs until the process is terminated; sessions
    /// keep running when this future is dropped, so stop them with
    /// [`SessionPool::shutdown`].
    pub async fn run(mut self) -> Result<(), BouncerError> {
        tracing::info!(
            characters = ?self.state.characters,
            "chatbnc running"
        );

        loop {
            match self.transport.accept().await {
                Ok(incoming) => {
                    let deadline = Instant::now() + self.state.identify_timeout;
                    let state = Arc::clone(&self.state);
                    tokio::spawn(serve_incoming(incoming, state, deadline));
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}

/// Finishes a client's handshakes within its identification deadline,
/// then hands it to the handler.
async fn serve_incoming<A: Authenticator>(
    incoming: IncomingConnection,
    state: Arc<ServerState<A>>,
    deadline: Instant,
) {
    let addr = incoming.peer_addr();

    let conn = match tokio::time::timeout_at(deadline, incoming.handshake()).await {
        Ok(Ok(conn)) => conn,
        Ok(Err(e)) => {
            tracing::debug!(%addr, error = %e, "client handshake failed");
            return;
        }
        Err(_) => {
            tracing::info!(%addr, "client handshake timed out");
            return;
        }
    };

    if let Err(e) = handle_connection(conn, state, deadline).await {
        tracing::debug!(error = %e, "connection ended with error");
    }
}
