//! Integration tests for upstream sessions, driven over in-memory
//! connections that play the chat service.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chatbnc_protocol::{Frame, Status};
use chatbnc_transport::{
    ConnectionId, MemoryConnection, MemoryPeer, TransportError, memory_pair,
};
use chatbnc_upstream::{
    Attachment, ClientHandle, ClientOutbound, LinkState, LogEntry, LogPolicy,
    MessageLogger, SessionConfig, SessionHandle, SessionPool, Ticket,
    TicketProvider, UpstreamConnector, UpstreamError,
};
use tokio::sync::mpsc;

// =========================================================================
// Fakes
// =========================================================================

/// Hands out whatever connections the test pushes, in order.
struct QueueConnector {
    pending: tokio::sync::Mutex<mpsc::UnboundedReceiver<MemoryConnection>>,
}

impl UpstreamConnector for QueueConnector {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection, UpstreamError> {
        self.pending.lock().await.recv().await.ok_or_else(|| {
            UpstreamError::Transport(TransportError::Closed(
                "no more connections".into(),
            ))
        })
    }
}

struct FixedTickets;

impl TicketProvider for FixedTickets {
    async fn ticket(&self) -> Result<Ticket, UpstreamError> {
        Ok(Ticket {
            ticket: "tkt".into(),
            bookmarks: vec!["Carol".into()],
        })
    }
}

#[derive(Default)]
struct RecordingLogger {
    entries: Mutex<Vec<LogEntry>>,
}

impl RecordingLogger {
    fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl MessageLogger for RecordingLogger {
    fn log(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

// =========================================================================
// Harness
// =========================================================================

const WAIT: Duration = Duration::from_secs(2);

struct Harness {
    handle: SessionHandle,
    conns: mpsc::UnboundedSender<MemoryConnection>,
    logger: Arc<RecordingLogger>,
}

fn test_config() -> SessionConfig {
    SessionConfig {
        account: "acc".into(),
        reconnect_base: Duration::ZERO,
        reconnect_max: Duration::ZERO,
        log_policy: LogPolicy::default(),
        ..SessionConfig::default()
    }
}

fn start(identity: &str) -> Harness {
    start_with(identity, test_config())
}

fn start_with(identity: &str, config: SessionConfig) -> Harness {
    let (conns, pending) = mpsc::unbounded_channel();
    let logger = Arc::new(RecordingLogger::default());
    let pool = SessionPool::start(
        &[identity.to_owned()],
        &config,
        Arc::new(QueueConnector {
            pending: tokio::sync::Mutex::new(pending),
        }),
        Arc::new(FixedTickets),
        logger.clone(),
    )
    .unwrap();
    Harness {
        handle: pool.get(identity).unwrap().clone(),
        conns,
        logger,
    }
}

impl Harness {
    /// Hands the session a connection and consumes its login IDN.
    async fn open_upstream(&self) -> MemoryPeer {
        let (conn, mut peer) = memory_pair();
        self.conns.send(conn).unwrap();
        let idn = recv_peer(&mut peer).await;
        assert!(idn.starts_with("IDN "), "expected IDN, got {idn}");
        peer
    }

    /// Opens the link and acknowledges the login.
    async fn connected(&self) -> MemoryPeer {
        let peer = self.open_upstream().await;
        peer.send(format!(r#"IDN {{"character":"{}"}}"#, self.handle.identity()));
        self.wait_for(|i| i.link == LinkState::Connected).await;
        peer
    }

    async fn wait_for(&self, cond: impl Fn(&chatbnc_upstream::SessionInfo) -> bool) {
        tokio::time::timeout(WAIT, async {
            loop {
                let info = self.handle.info().await.unwrap();
                if cond(&info) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }
}

fn client() -> (ClientHandle, mpsc::UnboundedReceiver<ClientOutbound>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ClientHandle::new(ConnectionId::next(), tx), rx)
}

async fn recv_peer(peer: &mut MemoryPeer) -> String {
    tokio::time::timeout(WAIT, peer.recv())
        .await
        .expect("timed out waiting for upstream frame")
        .expect("session closed the upstream connection")
}

async fn recv_client(rx: &mut mpsc::UnboundedReceiver<ClientOutbound>) -> ClientOutbound {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for client frame")
        .expect("session dropped the client")
}

/// Everything already queued for a client.
fn drain(rx: &mut mpsc::UnboundedReceiver<ClientOutbound>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        match item {
            ClientOutbound::Frame(text) => out.push(text),
            ClientOutbound::Close => out.push("<close>".into()),
        }
    }
    out
}

fn code(line: &str) -> &str {
    &line[..3]
}

fn payload(line: &str) -> serde_json::Value {
    serde_json::from_str(&line[4..]).unwrap()
}

fn frame(line: &str) -> Frame {
    Frame::parse(line).unwrap()
}

const BOB_MSG: &str = r#"MSG {"character":"Bob","message":"one","channel":"Frontpage"}"#;
const BOB_PRI: &str = r#"PRI {"character":"Bob","message":"two"}"#;
const BOB_LRP: &str = r#"LRP {"character":"Bob","message":"ad","channel":"Frontpage"}"#;

// =========================================================================
// Connecting
// =========================================================================

#[tokio::test]
async fn test_session_identifies_with_ticket() {
    let h = start("Alice");
    let (conn, mut peer) = memory_pair();
    h.conns.send(conn).unwrap();

    let idn = recv_peer(&mut peer).await;
    assert_eq!(code(&idn), "IDN");
    let json = payload(&idn);
    assert_eq!(json["method"], "ticket");
    assert_eq!(json["account"], "acc");
    assert_eq!(json["ticket"], "tkt");
    assert_eq!(json["character"], "Alice");
    assert_eq!(json["cname"], "chatbnc");

    assert_eq!(h.handle.info().await.unwrap().link, LinkState::Connecting);
}

#[tokio::test]
async fn test_upstream_pin_is_answered() {
    let h = start("Alice");
    let mut peer = h.connected().await;
    peer.send("PIN");
    assert_eq!(recv_peer(&mut peer).await, "PIN");
}

// =========================================================================
// Attach: snapshot, replay, deferral
// =========================================================================

#[tokio::test]
async fn test_attach_before_connected_is_deferred_until_identified() {
    let h = start("Alice");
    let (c, mut rx) = client();
    assert_eq!(h.handle.attach(c).await.unwrap(), Attachment::Deferred);
    assert_eq!(h.handle.info().await.unwrap().deferred, 1);
    assert!(drain(&mut rx).is_empty());

    let _peer = h.connected().await;
    h.wait_for(|i| i.clients == 1 && i.deferred == 0).await;

    let frames = drain(&mut rx);
    let codes: Vec<&str> = frames.iter().map(|f| code(f)).collect();
    assert_eq!(codes, ["HLO", "CON", "FRL", "IGN", "ADL", "NLN", "STA"]);
    assert_eq!(payload(&frames[2])["characters"], serde_json::json!(["Carol"]));
}

#[tokio::test]
async fn test_deferred_and_immediate_attach_get_same_snapshot() {
    let h = start("Alice");
    let (early, mut early_rx) = client();
    h.handle.attach(early).await.unwrap();
    let _peer = h.connected().await;
    h.wait_for(|i| i.clients == 1).await;

    let (late, mut late_rx) = client();
    assert_eq!(h.handle.attach(late).await.unwrap(), Attachment::Attached);

    assert_eq!(drain(&mut early_rx), drain(&mut late_rx));
}

#[tokio::test]
async fn test_detach_while_deferred_cancels_attach() {
    let h = start("Alice");
    let (c, mut rx) = client();
    let id = c.id();
    h.handle.attach(c).await.unwrap();
    h.handle.detach(id).await.unwrap();

    let mut peer = h.connected().await;
    let info = h.handle.info().await.unwrap();
    assert_eq!((info.clients, info.deferred), (0, 0));
    assert_eq!(info.idle_snapshot, None);
    assert!(drain(&mut rx).is_empty());
    // Never attached, so no idle status either.
    assert_eq!(peer.try_recv(), None);
}

#[tokio::test]
async fn test_snapshot_precedes_replay_in_arrival_order() {
    let h = start("Alice");
    let peer = h.connected().await;
    peer.send(BOB_MSG);
    peer.send(BOB_LRP);
    peer.send(BOB_PRI);
    h.wait_for(|i| i.replay_len == 2).await;

    let (c, mut rx) = client();
    h.handle.attach(c).await.unwrap();
    let frames = drain(&mut rx);

    let n = frames.len();
    assert_eq!(frames[n - 2], BOB_MSG);
    assert_eq!(frames[n - 1], BOB_PRI);
    assert!(frames[..n - 2].iter().all(|f| !matches!(code(f), "MSG" | "PRI" | "LRP")));
    assert_eq!(code(&frames[0]), "HLO");
}

#[tokio::test]
async fn test_attach_does_not_clear_replay() {
    let h = start("Alice");
    let peer = h.connected().await;
    peer.send(BOB_MSG);
    h.wait_for(|i| i.replay_len == 1).await;

    let (c, _rx) = client();
    h.handle.attach(c).await.unwrap();
    assert_eq!(h.handle.info().await.unwrap().replay_len, 1);
}

// =========================================================================
// Fan-out and relay
// =========================================================================

#[tokio::test]
async fn test_upstream_frames_fan_out_verbatim() {
    let h = start("Alice");
    let peer = h.connected().await;
    let (a, mut a_rx) = client();
    let (b, mut b_rx) = client();
    h.handle.attach(a).await.unwrap();
    h.handle.attach(b).await.unwrap();
    drain(&mut a_rx);
    drain(&mut b_rx);

    peer.send(BOB_LRP);
    for rx in [&mut a_rx, &mut b_rx] {
        assert_eq!(recv_client(rx).await, ClientOutbound::Frame(BOB_LRP.into()));
    }
}

#[tokio::test]
async fn test_client_message_clears_replay_and_is_forwarded() {
    let h = start("Alice");
    let mut peer = h.connected().await;
    peer.send(BOB_MSG);
    h.wait_for(|i| i.replay_len == 1).await;

    let (c, _rx) = client();
    let id = c.id();
    h.handle.attach(c).await.unwrap();

    let line = r#"PRI {"recipient":"Bob","message":"hey"}"#;
    h.handle.relay(id, frame(line)).await.unwrap();
    assert_eq!(recv_peer(&mut peer).await, line);
    assert_eq!(h.handle.info().await.unwrap().replay_len, 0);

    let logged = h.logger.entries();
    let last = logged.last().unwrap();
    assert_eq!(last.destination, "bob");
    assert_eq!(last.sender.as_deref(), Some("Alice"));
    assert_eq!(last.text, "hey");
}

#[tokio::test]
async fn test_client_pin_is_swallowed() {
    let h = start("Alice");
    let mut peer = h.connected().await;
    let (c, _rx) = client();
    let id = c.id();
    h.handle.attach(c).await.unwrap();

    h.handle.relay(id, frame("PIN")).await.unwrap();
    h.handle.relay(id, frame(BOB_MSG)).await.unwrap();
    assert_eq!(recv_peer(&mut peer).await, BOB_MSG);
}

#[tokio::test]
async fn test_channel_list_answered_from_fresh_cache() {
    let h = start("Alice");
    let mut peer = h.connected().await;
    let (c, mut rx) = client();
    let id = c.id();
    h.handle.attach(c).await.unwrap();
    drain(&mut rx);

    // Nothing cached yet: goes upstream.
    h.handle.relay(id, frame("CHA")).await.unwrap();
    assert_eq!(recv_peer(&mut peer).await, "CHA");

    let listing = r#"CHA {"channels":[{"name":"Frontpage","mode":"chat","characters":3}]}"#;
    peer.send(listing);
    assert_eq!(recv_client(&mut rx).await, ClientOutbound::Frame(listing.into()));

    // Cached now: answered locally.
    h.handle.relay(id, frame("CHA")).await.unwrap();
    let ClientOutbound::Frame(reply) = recv_client(&mut rx).await else {
        panic!("expected a frame");
    };
    assert_eq!(code(&reply), "CHA");
    assert_eq!(payload(&reply)["channels"][0]["name"], "Frontpage");
    h.handle.info().await.unwrap();
    assert_eq!(peer.try_recv(), None);
}

#[tokio::test]
async fn test_upstream_messages_are_logged() {
    let h = start("Alice");
    let peer = h.connected().await;
    peer.send(BOB_PRI);
    h.wait_for(|i| i.replay_len == 1).await;

    let logged = h.logger.entries();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].destination, "bob");
    assert_eq!(logged[0].format_line().split_once(' ').unwrap().1, "Bob: two\n");
}

// =========================================================================
// Idle status
// =========================================================================

#[tokio::test]
async fn test_last_detach_goes_idle_and_next_attach_restores() {
    let h = start("Alice");
    let mut peer = h.connected().await;
    peer.send(r#"NLN {"identity":"Alice","gender":"Female","status":"online"}"#);
    peer.send(r#"STA {"character":"Alice","status":"busy","statusmsg":"brb"}"#);
    peer.send(BOB_MSG);
    h.wait_for(|i| i.replay_len == 1).await;

    let (a, _a_rx) = client();
    let a_id = a.id();
    h.handle.attach(a).await.unwrap();
    assert_eq!(h.handle.info().await.unwrap().idle_snapshot, None);
    h.handle.detach(a_id).await.unwrap();

    let idle = recv_peer(&mut peer).await;
    assert_eq!(code(&idle), "STA");
    assert_eq!(payload(&idle)["status"], "idle");
    assert_eq!(payload(&idle)["statusmsg"], "Disconnected");
    assert_eq!(
        h.handle.info().await.unwrap().idle_snapshot,
        Some((Status::Busy, "brb".into()))
    );

    let (b, mut b_rx) = client();
    h.handle.attach(b).await.unwrap();
    let restore = recv_peer(&mut peer).await;
    assert_eq!(payload(&restore)["status"], "busy");
    assert_eq!(payload(&restore)["statusmsg"], "brb");
    assert_eq!(h.handle.info().await.unwrap().idle_snapshot, None);
    assert!(!drain(&mut b_rx).is_empty());
}

#[tokio::test]
async fn test_detach_of_one_of_two_clients_keeps_status() {
    let h = start("Alice");
    let mut peer = h.connected().await;
    let (a, _a_rx) = client();
    let (b, _b_rx) = client();
    let a_id = a.id();
    h.handle.attach(a).await.unwrap();
    h.handle.attach(b).await.unwrap();

    h.handle.detach(a_id).await.unwrap();
    let info = h.handle.info().await.unwrap();
    assert_eq!(info.clients, 1);
    assert_eq!(info.idle_snapshot, None);
    assert_eq!(peer.try_recv(), None);
}

#[tokio::test]
async fn test_unknown_detach_is_noop() {
    let h = start("Alice");
    let mut peer = h.connected().await;
    h.handle.detach(ConnectionId::new(u64::MAX)).await.unwrap();
    let info = h.handle.info().await.unwrap();
    assert_eq!(info.idle_snapshot, None);
    assert_eq!(peer.try_recv(), None);
}

// =========================================================================
// Link loss
// =========================================================================

#[tokio::test]
async fn test_upstream_close_closes_clients_and_reconnects() {
    let h = start("Alice");
    let mut peer = h.connected().await;
    peer.send(BOB_MSG);
    let (c, mut rx) = client();
    h.handle.attach(c).await.unwrap();
    h.wait_for(|i| i.replay_len == 1).await;

    peer.close();
    loop {
        if recv_client(&mut rx).await == ClientOutbound::Close {
            break;
        }
    }
    h.wait_for(|i| i.link == LinkState::Connecting && i.clients == 0).await;

    // Replay survives, and the session logs in again on a new socket.
    let info = h.handle.info().await.unwrap();
    assert_eq!(info.replay_len, 1);
    assert!(info.idle_snapshot.is_some());
    let _peer = h.connected().await;
}

#[tokio::test]
async fn test_unacknowledged_login_is_dropped_and_retried() {
    let h = start_with(
        "Alice",
        SessionConfig {
            login_timeout: Duration::from_millis(100),
            ..test_config()
        },
    );
    let (c, _rx) = client();
    assert_eq!(h.handle.attach(c).await.unwrap(), Attachment::Deferred);

    // The service takes the IDN and never answers.
    let mut silent = h.open_upstream().await;
    let closed = tokio::time::timeout(WAIT, silent.recv())
        .await
        .expect("silent upstream should be closed");
    assert_eq!(closed, None);

    // The deferred client is still waiting and lands on the retry.
    h.wait_for(|i| i.link == LinkState::Connecting && i.deferred == 1).await;
    let _peer = h.connected().await;
    h.wait_for(|i| i.clients == 1 && i.deferred == 0).await;
}

#[tokio::test]
async fn test_acknowledged_login_outlives_login_timeout() {
    let h = start_with(
        "Alice",
        SessionConfig {
            login_timeout: Duration::from_millis(50),
            ..test_config()
        },
    );
    let mut peer = h.connected().await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    let info = h.handle.info().await.unwrap();
    assert_eq!(info.link, LinkState::Connected);
    assert!(peer.try_recv().is_none());
    assert!(peer.send(BOB_MSG));
    h.wait_for(|i| i.replay_len == 1).await;
}

#[tokio::test]
async fn test_reconnect_sends_idle_status_when_nobody_attached() {
    let h = start("Alice");
    let mut peer = h.connected().await;
    let (c, _rx) = client();
    h.handle.attach(c).await.unwrap();
    h.wait_for(|i| i.clients == 1).await;
    peer.close();
    h.wait_for(|i| i.link == LinkState::Connecting).await;

    let mut peer = h.open_upstream().await;
    peer.send(r#"IDN {"character":"Alice"}"#);
    let sta = recv_peer(&mut peer).await;
    assert_eq!(payload(&sta)["status"], "idle");
}

// =========================================================================
// Pool
// =========================================================================

#[tokio::test]
async fn test_pool_rejects_more_than_three_identities() {
    let (_tx, pending) = mpsc::unbounded_channel();
    let names: Vec<String> = ["A", "B", "C", "D"].map(String::from).to_vec();
    let result = SessionPool::start(
        &names,
        &test_config(),
        Arc::new(QueueConnector {
            pending: tokio::sync::Mutex::new(pending),
        }),
        Arc::new(FixedTickets),
        Arc::new(RecordingLogger::default()),
    );
    assert!(matches!(result, Err(UpstreamError::TooManyIdentities(4))));
}

#[tokio::test]
async fn test_pool_one_session_per_identity() {
    let (_tx, pending) = mpsc::unbounded_channel();
    let names: Vec<String> = ["A", "B", "A"].map(String::from).to_vec();
    let pool = SessionPool::start(
        &names,
        &test_config(),
        Arc::new(QueueConnector {
            pending: tokio::sync::Mutex::new(pending),
        }),
        Arc::new(FixedTickets),
        Arc::new(RecordingLogger::default()),
    )
    .unwrap();
    assert_eq!(pool.len(), 2);
    assert_eq!(pool.get("B").unwrap().identity(), "B");
    assert!(pool.get("Z").is_none());
    pool.shutdown().await;
}
