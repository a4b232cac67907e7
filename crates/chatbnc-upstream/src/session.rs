//! Upstream session actor: one persistent chat login shared by many
//! local clients.
//!
//! Each managed character gets its own Tokio task that owns everything
//! about that login: the upstream socket, the [`ChatState`], the
//! [`ReplayBuffer`], and the set of attached clients. The outside world
//! talks to it through a [`SessionHandle`]; socket I/O talks to it through
//! an internal event channel. Nothing is shared, so nothing is locked.
//!
//! ```text
//!   client handlers ──SessionCommand──┐
//!                                     ▼
//!                              UpstreamActor ──send──→ chat service
//!                                     ▲
//!   connect task / reader task ──LinkEvent──┘
//! ```
//!
//! Every upstream connection gets a new *generation* number. Events carry
//! the generation they were produced for, so a late event from a socket
//! that has already been replaced is ignored.

use std::sync::Arc;
use std::time::Duration;

use chatbnc_protocol::{
    ClientCommand, Codec, Frame, FrameCodec, MessageKind, ServerCommand,
    Status,
};
use chatbnc_transport::{Connection, ConnectionId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::{
    ChatState, LinkState, MessageLogger, ReplayBuffer, SessionConfig, Ticket,
    TicketProvider, UpstreamConnector, UpstreamError,
};

/// Status message shown upstream while no client is attached.
pub const IDLE_STATUS_MESSAGE: &str = "Disconnected";

/// Default command channel size for session actors.
pub const DEFAULT_CHANNEL_SIZE: usize = 64;

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// Something the session wants a client's connection handler to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientOutbound {
    /// Write this line to the client socket.
    Frame(String),
    /// Close the client socket (the upstream link dropped).
    Close,
}

/// Channel for delivering outbound traffic to one client.
pub type ClientSender = mpsc::UnboundedSender<ClientOutbound>;

/// A local client's outbound queue, as seen by a session.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ConnectionId,
    sender: ClientSender,
}

impl ClientHandle {
    pub fn new(id: ConnectionId, sender: ClientSender) -> Self {
        Self { id, sender }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues a line. Silently drops it if the handler is gone.
    fn send(&self, text: impl Into<String>) {
        let _ = self.sender.send(ClientOutbound::Frame(text.into()));
    }

    fn close(&self) {
        let _ = self.sender.send(ClientOutbound::Close);
    }
}

/// How an attach request was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    /// Snapshot and replay were queued for the client.
    Attached,
    /// The upstream link isn't identified yet. The attach runs once it is.
    Deferred,
}

/// A point-in-time view of a session, for status checks and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub identity: String,
    pub link: LinkState,
    /// Attached clients.
    pub clients: usize,
    /// Clients waiting for the link to come up.
    pub deferred: usize,
    pub replay_len: usize,
    /// Real status saved while nobody is attached.
    pub idle_snapshot: Option<(Status, String)>,
}

// ---------------------------------------------------------------------------
// Commands and events
// ---------------------------------------------------------------------------

/// Commands sent to a session actor through its handle.
pub(crate) enum SessionCommand {
    Attach {
        client: ClientHandle,
        reply: oneshot::Sender<Attachment>,
    },
    Detach {
        id: ConnectionId,
    },
    /// A frame from an identified client, bound for upstream.
    Relay {
        id: ConnectionId,
        frame: Frame,
    },
    GetInfo {
        reply: oneshot::Sender<SessionInfo>,
    },
    Shutdown,
}

/// Reports from the connect and reader tasks.
enum LinkEvent<K> {
    Opened {
        generation: u64,
        conn: Arc<K>,
        ticket: Ticket,
    },
    Failed {
        generation: u64,
        error: UpstreamError,
    },
    Frame {
        generation: u64,
        text: String,
    },
    Closed {
        generation: u64,
        reason: String,
    },
    /// The service never answered our `IDN`.
    LoginTimedOut {
        generation: u64,
    },
}

impl<K> LinkEvent<K> {
    fn generation(&self) -> u64 {
        match self {
            Self::Opened { generation, .. }
            | Self::Failed { generation, .. }
            | Self::Frame { generation, .. }
            | Self::Closed { generation, .. }
            | Self::LoginTimedOut { generation } => *generation,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Handle to a running session actor. Cheap to clone.
#[derive(Clone)]
pub struct SessionHandle {
    identity: Arc<str>,
    sender: mpsc::Sender<SessionCommand>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    /// The managed character this session logs in as.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    fn unavailable(&self) -> UpstreamError {
        UpstreamError::Unavailable(self.identity.to_string())
    }

    /// Attaches a client. It receives the snapshot and replay through its
    /// own channel, now or once the link is up.
    pub async fn attach(&self, client: ClientHandle) -> Result<Attachment, UpstreamError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::Attach {
                client,
                reply: reply_tx,
            })
            .await
            .map_err(|_| self.unavailable())?;
        reply_rx.await.map_err(|_| self.unavailable())
    }

    /// Detaches a client (attached or still deferred).
    pub async fn detach(&self, id: ConnectionId) -> Result<(), UpstreamError> {
        self.sender
            .send(SessionCommand::Detach { id })
            .await
            .map_err(|_| self.unavailable())
    }

    /// Forwards a client frame upstream (fire-and-forget).
    pub async fn relay(&self, id: ConnectionId, frame: Frame) -> Result<(), UpstreamError> {
        self.sender
            .send(SessionCommand::Relay { id, frame })
            .await
            .map_err(|_| self.unavailable())
    }

    pub async fn info(&self) -> Result<SessionInfo, UpstreamError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::GetInfo { reply: reply_tx })
            .await
            .map_err(|_| self.unavailable())?;
        reply_rx.await.map_err(|_| self.unavailable())
    }

    /// Stops the actor, closing the upstream link and every client.
    pub async fn shutdown(&self) -> Result<(), UpstreamError> {
        self.sender
            .send(SessionCommand::Shutdown)
            .await
            .map_err(|_| self.unavailable())
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct UpstreamActor<C: UpstreamConnector, T: TicketProvider> {
    identity: String,
    config: SessionConfig,
    connector: Arc<C>,
    tickets: Arc<T>,
    logger: Arc<dyn MessageLogger>,

    link: LinkState,
    generation: u64,
    /// Consecutive failed attempts since the last successful login.
    attempt: u32,
    upstream: Option<Arc<C::Connection>>,
    connect_task: Option<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
    login_timer: Option<JoinHandle<()>>,

    clients: Vec<ClientHandle>,
    /// Attaches waiting for the link to come up, in arrival order.
    deferred: Vec<ClientHandle>,
    idle_snapshot: Option<(Status, String)>,
    state: ChatState,
    replay: ReplayBuffer,

    commands: mpsc::Receiver<SessionCommand>,
    events_tx: mpsc::UnboundedSender<LinkEvent<C::Connection>>,
    events: mpsc::UnboundedReceiver<LinkEvent<C::Connection>>,
}

impl<C: UpstreamConnector, T: TicketProvider> UpstreamActor<C, T> {
    async fn run(mut self) {
        tracing::info!(identity = %self.identity, "session actor started");
        self.start_connect();

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },
                Some(event) = self.events.recv() => self.handle_event(event).await,
            }
        }

        self.stop().await;
        tracing::info!(identity = %self.identity, "session actor stopped");
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Attach { client, reply } => {
                let result = self.handle_attach(client).await;
                let _ = reply.send(result);
            }
            SessionCommand::Detach { id } => self.handle_detach(id).await,
            SessionCommand::Relay { id, frame } => self.handle_relay(id, frame).await,
            SessionCommand::GetInfo { reply } => {
                let _ = reply.send(self.info());
            }
            // Handled by the run loop.
            SessionCommand::Shutdown => {}
        }
    }

    // -----------------------------------------------------------------------
    // Attach / detach
    // -----------------------------------------------------------------------

    async fn handle_attach(&mut self, client: ClientHandle) -> Attachment {
        if !self.link.is_connected() {
            tracing::debug!(
                identity = %self.identity,
                conn_id = %client.id(),
                link = %self.link,
                "attach deferred until upstream is identified"
            );
            self.deferred.push(client);
            return Attachment::Deferred;
        }
        self.attach_now(client).await;
        Attachment::Attached
    }

    async fn attach_now(&mut self, client: ClientHandle) {
        if self.clients.is_empty() {
            if let Some((status, statusmsg)) = self.idle_snapshot.take() {
                self.send_command(&ClientCommand::Sta { status, statusmsg }).await;
            }
        }

        for cmd in self.state.snapshot(&self.config.welcome()) {
            match FrameCodec.encode(&cmd) {
                Ok(frame) => client.send(frame.into_string()),
                Err(e) => tracing::warn!(identity = %self.identity, error = %e, "failed to encode snapshot frame"),
            }
        }
        for line in self.replay.iter() {
            client.send(line);
        }

        tracing::info!(
            identity = %self.identity,
            conn_id = %client.id(),
            clients = self.clients.len() + 1,
            replayed = self.replay.len(),
            "client attached"
        );
        self.clients.push(client);
    }

    async fn handle_detach(&mut self, id: ConnectionId) {
        self.deferred.retain(|c| c.id() != id);

        let before = self.clients.len();
        self.clients.retain(|c| c.id() != id);
        if self.clients.len() == before {
            return;
        }
        tracing::info!(
            identity = %self.identity,
            conn_id = %id,
            clients = self.clients.len(),
            "client detached"
        );

        if self.clients.is_empty() {
            self.idle_snapshot = Some(self.state.own_status());
            self.send_idle_status().await;
        }
    }

    async fn send_idle_status(&self) {
        self.send_command(&ClientCommand::Sta {
            status: Status::Idle,
            statusmsg: IDLE_STATUS_MESSAGE.into(),
        })
        .await;
    }

    // -----------------------------------------------------------------------
    // Client → upstream
    // -----------------------------------------------------------------------

    async fn handle_relay(&mut self, id: ConnectionId, frame: Frame) {
        if self.config.trace_frames {
            tracing::debug!(identity = %self.identity, conn_id = %id, frame = %frame, ">>> client");
        }
        if !self.link.is_connected() {
            tracing::debug!(identity = %self.identity, conn_id = %id, code = frame.code(), "upstream not connected, dropping client frame");
            return;
        }

        match frame.code() {
            // We answer the service's pings ourselves.
            "PIN" => return,
            "CHA" => {
                if let Some(cmd) = self.state.fresh_public_channels(self.config.channel_list_max_age) {
                    self.reply_to(id, &cmd);
                    return;
                }
            }
            "ORS" => {
                if let Some(cmd) = self.state.fresh_open_rooms(self.config.channel_list_max_age) {
                    self.reply_to(id, &cmd);
                    return;
                }
            }
            code => {
                if MessageKind::from_code(code).is_some_and(MessageKind::clears_replay) {
                    self.log_client_message(&frame);
                    self.replay.clear();
                }
            }
        }

        self.send_upstream(frame.as_str()).await;
    }

    fn reply_to(&self, id: ConnectionId, cmd: &ServerCommand) {
        let Some(client) = self.clients.iter().find(|c| c.id() == id) else {
            return;
        };
        match FrameCodec.encode(cmd) {
            Ok(frame) => client.send(frame.into_string()),
            Err(e) => tracing::warn!(identity = %self.identity, error = %e, "failed to encode reply"),
        }
    }

    fn log_client_message(&self, frame: &Frame) {
        match FrameCodec.decode::<ClientCommand>(frame) {
            Ok(cmd) => {
                let now = chrono::Local::now();
                if let Some(entry) = self.config.log_policy.client_entry(&cmd, &self.state, now) {
                    self.logger.log(&entry);
                }
            }
            Err(e) => {
                tracing::debug!(identity = %self.identity, code = frame.code(), error = %e, "undecodable client message, not logged");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Upstream → clients
    // -----------------------------------------------------------------------

    async fn handle_event(&mut self, event: LinkEvent<C::Connection>) {
        if event.generation() != self.generation {
            tracing::trace!(identity = %self.identity, "ignoring event from stale connection");
            return;
        }

        match event {
            LinkEvent::Opened { conn, ticket, .. } => self.on_opened(conn, ticket).await,
            LinkEvent::Failed { error, .. } => {
                tracing::warn!(identity = %self.identity, attempt = self.attempt, error = %error, "upstream connect failed");
                self.link = LinkState::Closed;
                self.start_connect();
            }
            LinkEvent::Frame { text, .. } => self.on_upstream_frame(text).await,
            LinkEvent::Closed { reason, .. } => self.on_closed(&reason),
            LinkEvent::LoginTimedOut { .. } => {
                if self.link.is_connected() {
                    return;
                }
                if let Some(conn) = self.upstream.take() {
                    let _ = conn.close().await;
                }
                self.on_closed("login not acknowledged");
            }
        }
    }

    async fn on_opened(&mut self, conn: Arc<C::Connection>, ticket: Ticket) {
        tracing::info!(identity = %self.identity, conn_id = %conn.id(), "upstream connected, identifying");
        self.state.set_bookmarks(ticket.bookmarks);
        self.upstream = Some(Arc::clone(&conn));

        let events = self.events_tx.clone();
        let generation = self.generation;
        self.reader_task = Some(tokio::spawn(async move {
            loop {
                match conn.recv().await {
                    Ok(Some(text)) => {
                        if events.send(LinkEvent::Frame { generation, text }).is_err() {
                            return;
                        }
                    }
                    Ok(None) => {
                        let _ = events.send(LinkEvent::Closed {
                            generation,
                            reason: "closed by peer".into(),
                        });
                        return;
                    }
                    Err(e) => {
                        let _ = events.send(LinkEvent::Closed {
                            generation,
                            reason: e.to_string(),
                        });
                        return;
                    }
                }
            }
        }));

        let timeout = self.config.login_timeout;
        let events = self.events_tx.clone();
        self.login_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = events.send(LinkEvent::LoginTimedOut { generation });
        }));

        self.send_command(&ClientCommand::Idn {
            method: "ticket".into(),
            account: self.config.account.clone(),
            ticket: ticket.ticket,
            character: self.identity.clone(),
            cname: self.config.client_name.clone(),
            cversion: self.config.client_version.clone(),
        })
        .await;
    }

    async fn on_upstream_frame(&mut self, text: String) {
        if self.config.trace_frames {
            tracing::debug!(identity = %self.identity, frame = %text, "<<< upstream");
        }

        let frame = match Frame::parse(text.as_str()) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::debug!(identity = %self.identity, error = %e, "unparseable upstream frame");
                None
            }
        };
        let cmd = frame.as_ref().and_then(|f| match FrameCodec.decode::<ServerCommand>(f) {
            Ok(cmd) => Some(cmd),
            Err(e) => {
                tracing::debug!(identity = %self.identity, code = f.code(), error = %e, "untracked upstream frame");
                None
            }
        });

        if let Some(cmd) = &cmd {
            self.state.apply(cmd);
        }

        for client in &self.clients {
            client.send(text.as_str());
        }

        let Some(frame) = frame else { return };
        if MessageKind::from_code(frame.code()).is_some_and(MessageKind::is_replayable) {
            self.replay.push(text);
        }

        match &cmd {
            Some(ServerCommand::Pin) => self.send_upstream("PIN").await,
            Some(ServerCommand::Idn { .. }) => self.on_identified().await,
            Some(cmd) => {
                let now = chrono::Local::now();
                if let Some(entry) = self.config.log_policy.upstream_entry(cmd, &self.state, now) {
                    self.logger.log(&entry);
                }
            }
            None => {}
        }
    }

    /// The service acknowledged our `IDN`.
    async fn on_identified(&mut self) {
        if self.link.is_connected() {
            return;
        }
        self.link = LinkState::Connected;
        self.attempt = 0;
        if let Some(task) = self.login_timer.take() {
            task.abort();
        }
        tracing::info!(identity = %self.identity, deferred = self.deferred.len(), "upstream identified");

        for client in std::mem::take(&mut self.deferred) {
            self.attach_now(client).await;
        }
        if self.clients.is_empty() && self.idle_snapshot.is_some() {
            self.send_idle_status().await;
        }
    }

    fn on_closed(&mut self, reason: &str) {
        tracing::warn!(identity = %self.identity, reason, clients = self.clients.len(), "upstream connection closed");
        self.link = LinkState::Closed;
        self.upstream = None;
        for task in [self.reader_task.take(), self.login_timer.take()].into_iter().flatten() {
            task.abort();
        }

        if !self.clients.is_empty() {
            self.idle_snapshot = Some(self.state.own_status());
        }
        for client in self.clients.drain(..) {
            client.close();
        }
        self.state.reset();
        self.start_connect();
    }

    // -----------------------------------------------------------------------
    // Link management
    // -----------------------------------------------------------------------

    /// Starts a new connection generation: wait out the backoff, fetch a
    /// ticket, dial.
    fn start_connect(&mut self) {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        self.generation += 1;
        self.link = LinkState::Connecting;

        let delay = match self.attempt {
            0 => Duration::ZERO,
            n => self.config.reconnect_delay(n - 1),
        };
        self.attempt = self.attempt.saturating_add(1);
        if !delay.is_zero() {
            tracing::info!(identity = %self.identity, delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
        }

        let connector = Arc::clone(&self.connector);
        let tickets = Arc::clone(&self.tickets);
        let events = self.events_tx.clone();
        let generation = self.generation;
        self.connect_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let opened = async {
                let ticket = tickets.ticket().await?;
                let conn = connector.connect().await?;
                Ok::<_, UpstreamError>((conn, ticket))
            }
            .await;
            let event = match opened {
                Ok((conn, ticket)) => LinkEvent::Opened {
                    generation,
                    conn: Arc::new(conn),
                    ticket,
                },
                Err(error) => LinkEvent::Failed { generation, error },
            };
            let _ = events.send(event);
        }));
    }

    async fn send_upstream(&self, text: &str) {
        let Some(conn) = &self.upstream else {
            tracing::debug!(identity = %self.identity, "no upstream connection, dropping frame");
            return;
        };
        if self.config.trace_frames {
            tracing::debug!(identity = %self.identity, frame = text, ">>> upstream");
        }
        if let Err(e) = conn.send(text).await {
            // The reader task reports the close.
            tracing::warn!(identity = %self.identity, error = %e, "upstream send failed");
        }
    }

    async fn send_command(&self, cmd: &ClientCommand) {
        match FrameCodec.encode(cmd) {
            Ok(frame) => self.send_upstream(frame.as_str()).await,
            Err(e) => tracing::warn!(identity = %self.identity, error = %e, "failed to encode upstream command"),
        }
    }

    async fn stop(&mut self) {
        let tasks = [
            self.connect_task.take(),
            self.reader_task.take(),
            self.login_timer.take(),
        ];
        for task in tasks.into_iter().flatten() {
            task.abort();
        }
        if let Some(conn) = self.upstream.take() {
            let _ = conn.close().await;
        }
        for client in self.clients.drain(..).chain(self.deferred.drain(..)) {
            client.close();
        }
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            identity: self.identity.clone(),
            link: self.link,
            clients: self.clients.len(),
            deferred: self.deferred.len(),
            replay_len: self.replay.len(),
            idle_snapshot: self.idle_snapshot.clone(),
        }
    }
}

/// Spawns a session actor for `identity` and returns its handle. The
/// actor starts connecting immediately.
pub fn spawn_session<C, T>(
    identity: impl Into<String>,
    config: SessionConfig,
    connector: Arc<C>,
    tickets: Arc<T>,
    logger: Arc<dyn MessageLogger>,
    channel_size: usize,
) -> SessionHandle
where
    C: UpstreamConnector,
    T: TicketProvider,
{
    let identity = identity.into();
    let (tx, rx) = mpsc::channel(channel_size);
    let (events_tx, events) = mpsc::unbounded_channel();

    let actor = UpstreamActor::<C, T> {
        identity: identity.clone(),
        replay: ReplayBuffer::new(config.replay_limit),
        state: ChatState::new(identity.as_str()),
        config,
        connector,
        tickets,
        logger,
        link: LinkState::Connecting,
        generation: 0,
        attempt: 0,
        upstream: None,
        connect_task: None,
        reader_task: None,
        login_timer: None,
        clients: Vec::new(),
        deferred: Vec::new(),
        idle_snapshot: None,
        commands: rx,
        events_tx,
        events,
    };

    tokio::spawn(actor.run());

    SessionHandle {
        identity: identity.into(),
        sender: tx,
    }
}
