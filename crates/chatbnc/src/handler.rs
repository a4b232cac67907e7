//! Per-connection handler: identification, keepalive and relaying.
//!
//! Each accepted client gets its own Tokio task running this handler.
//! The flow is:
//!   1. Wait for `IDN`. Anything else gets `ERR 3`; silence until the
//!      identify deadline (counted from accept) closes the socket.
//!   2. Check the ticket with the [`Authenticator`] on a separate task so
//!      the socket keeps being read while the service answers.
//!   3. Acknowledge with `IDN`, start the `PIN` keepalive and attach to
//!      the character's session.
//!   4. Loop: client frames go to the session, session output goes to
//!      the client.

use std::sync::Arc;

use chatbnc_protocol::{Codec, ErrorCode, Frame, FrameCodec, ServerCommand};
use chatbnc_session::{
    AuthGate, AuthOutcome, Authenticator, GateAction, GateState,
    SessionError,
};
use chatbnc_transport::{Connection, WebSocketConnection};
use chatbnc_upstream::{
    Attachment, ClientHandle, ClientOutbound, ClientSender, SessionHandle,
    UpstreamError,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::BouncerError;
use crate::server::ServerState;

/// What one client connection has established so far.
struct Client {
    gate: AuthGate,
    /// Set once identified.
    session: Option<SessionHandle>,
    /// The authenticator call for the attempt the gate is waiting on.
    pending_auth: Option<JoinHandle<Result<(), SessionError>>>,
    keepalive: Option<Interval>,
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<A: Authenticator>(
    conn: WebSocketConnection,
    state: Arc<ServerState<A>>,
    deadline: Instant,
) -> Result<(), BouncerError> {
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    let mut client = Client {
        gate: AuthGate::new(state.account.clone(), state.characters.clone()),
        session: None,
        pending_auth: None,
        keepalive: None,
    };

    let result = serve(&conn, &state, &mut client, deadline).await;

    // Runs exactly once, however the loop ended.
    client.gate.close();
    if let Some(task) = client.pending_auth.take() {
        task.abort();
    }
    if let Some(session) = client.session.take() {
        if let Err(e) = session.detach(conn_id).await {
            tracing::debug!(%conn_id, error = %e, "detach failed");
        }
        tracing::info!(%conn_id, character = session.identity(), "client detached");
    }
    let _ = conn.close().await;

    result
}

async fn serve<A: Authenticator>(
    conn: &WebSocketConnection,
    state: &Arc<ServerState<A>>,
    client: &mut Client,
    deadline: Instant,
) -> Result<(), BouncerError> {
    let conn_id = conn.id();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel();

    let deadline = tokio::time::sleep_until(deadline);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            incoming = conn.recv() => {
                let text = match incoming {
                    Ok(Some(text)) => text,
                    Ok(None) => {
                        tracing::debug!(%conn_id, "connection closed cleanly");
                        return Ok(());
                    }
                    Err(e) => {
                        tracing::debug!(%conn_id, error = %e, "recv error");
                        return Ok(());
                    }
                };
                on_text(conn, state, client, text).await?;
            }

            Some(out) = outbound_rx.recv() => match out {
                ClientOutbound::Frame(line) => conn.send(&line).await?,
                ClientOutbound::Close => {
                    tracing::info!(%conn_id, "upstream link closed, dropping client");
                    return Ok(());
                }
            },

            () = &mut deadline, if *client.gate.state() == GateState::AwaitingIdentification => {
                if client.gate.on_deadline() {
                    tracing::info!(%conn_id, "no identification in time");
                    return Ok(());
                }
            }

            () = tick(&mut client.keepalive) => conn.send("PIN").await?,

            verdict = auth_verdict(&mut client.pending_auth) => {
                client.pending_auth = None;
                on_verdict(conn, state, client, &outbound, verdict).await?;
            }
        }
    }
}

/// One line from the client.
async fn on_text<A: Authenticator>(
    conn: &WebSocketConnection,
    state: &Arc<ServerState<A>>,
    client: &mut Client,
    text: String,
) -> Result<(), BouncerError> {
    let conn_id = conn.id();

    let frame = match Frame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(%conn_id, error = %e, "malformed client frame");
            if *client.gate.state() == GateState::AwaitingIdentification {
                send_error(conn, ErrorCode::NotLoggedIn).await?;
            }
            return Ok(());
        }
    };

    match client.gate.on_frame(frame) {
        GateAction::Reject(code) => send_error(conn, code).await?,

        GateAction::Authenticate(attempt) => {
            tracing::debug!(
                %conn_id,
                character = %attempt.character,
                "identification attempt"
            );
            let state = Arc::clone(state);
            client.pending_auth = Some(tokio::spawn(async move {
                state.auth.authenticate(&state.account, &attempt.ticket).await
            }));
        }

        GateAction::Relay(frame) => {
            if let Some(session) = &client.session {
                session.relay(conn_id, frame).await?;
            }
        }

        GateAction::Ignore => {}
    }
    Ok(())
}

/// The authenticator answered for the pending attempt.
async fn on_verdict<A: Authenticator>(
    conn: &WebSocketConnection,
    state: &Arc<ServerState<A>>,
    client: &mut Client,
    outbound: &ClientSender,
    verdict: Result<(), SessionError>,
) -> Result<(), BouncerError> {
    let conn_id = conn.id();

    let character = match client.gate.on_auth_result(verdict) {
        AuthOutcome::Identified { character } => character,
        AuthOutcome::Rejected(code) => {
            tracing::info!(%conn_id, code = code.number(), "identification failed");
            return send_error(conn, code).await;
        }
        AuthOutcome::Cancelled => return Ok(()),
    };

    let session = state
        .pool
        .get(&character)
        .cloned()
        .ok_or_else(|| UpstreamError::UnknownIdentity(character.clone()))?;

    let ack = FrameCodec.encode(&ServerCommand::Idn {
        character: character.clone(),
    })?;
    conn.send(ack.as_str()).await?;

    client.keepalive = Some(keepalive_timer(state.keepalive_interval));

    let attachment = session
        .attach(ClientHandle::new(conn_id, outbound.clone()))
        .await?;
    client.session = Some(session);

    match attachment {
        Attachment::Attached => {
            tracing::info!(%conn_id, %character, "client attached");
        }
        Attachment::Deferred => {
            tracing::info!(
                %conn_id,
                %character,
                "client identified, waiting for upstream login"
            );
        }
    }
    Ok(())
}

async fn send_error(
    conn: &WebSocketConnection,
    code: ErrorCode,
) -> Result<(), BouncerError> {
    let frame = FrameCodec.encode(&code.to_command())?;
    conn.send(frame.as_str()).await?;
    Ok(())
}

/// First tick one `period` from now. A stalled client gets one `PIN`
/// when it recovers, not one per missed period.
fn keepalive_timer(period: std::time::Duration) -> Interval {
    let mut timer = tokio::time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

/// Resolves on each keepalive tick, never before identification.
async fn tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Resolves with the authenticator's answer, never while idle.
async fn auth_verdict(
    task: &mut Option<JoinHandle<Result<(), SessionError>>>,
) -> Result<(), SessionError> {
    match task {
        Some(handle) => handle
            .await
            .unwrap_or_else(|e| Err(SessionError::Unavailable(e.to_string()))),
        None => std::future::pending().await,
    }
}
