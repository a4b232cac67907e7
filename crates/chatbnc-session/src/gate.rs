//! The identification gate: one per local client connection.
//!
//! A freshly accepted connection can't do anything until it proves it may
//! drive one of the bouncer's characters. The gate is a small state
//! machine that decides, for each incoming frame, what the connection
//! handler should do about it:
//!
//! ```text
//!                       IDN ──→ [attempt in flight] ──ok──→ Identified
//!                        ↑            │                        │
//! AwaitingIdentification ┘←──reject───┘                        │
//!          │                                                   │
//!     (deadline)                                          (socket close)
//!          ▼                                                   ▼
//!        Closed ←──────────────(socket close)──────────────── Closed
//! ```
//!
//! The gate does no I/O and owns no timers. The handler owns those; the
//! gate only tells it which transitions happened. That keeps every
//! rule here testable without sockets or a runtime.

use std::collections::HashSet;
use std::time::Duration;

use chatbnc_protocol::{ClientCommand, Codec, ErrorCode, Frame, FrameCodec};

use crate::SessionError;

/// How long a new connection has to identify before it's dropped.
pub const IDENTIFY_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Interval between keepalive `PIN`s sent to an identified client.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(30_000);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Lifecycle of a client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    /// Only `IDN` is accepted. A deadline is running.
    AwaitingIdentification,
    /// Bound to the named character's upstream session.
    Identified { character: String },
    /// Terminal. Nothing further is processed.
    Closed,
}

/// Credentials from an `IDN`, waiting for the authenticator's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub account: String,
    pub ticket: String,
    pub character: String,
}

/// What the handler should do with a client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum GateAction {
    /// Send an `ERR` with this code to the client. No state change.
    Reject(ErrorCode),
    /// Run the authenticator for this attempt, then report back through
    /// [`AuthGate::on_auth_result`].
    Authenticate(Attempt),
    /// Forward the frame to the bound upstream session.
    Relay(Frame),
    /// Drop the frame silently.
    Ignore,
}

/// Result of feeding an authenticator verdict back into the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The connection is now bound to `character`.
    Identified { character: String },
    /// Identification failed. The connection may try again.
    Rejected(ErrorCode),
    /// The gate closed (or never asked) while the verdict was pending.
    /// Nothing changed.
    Cancelled,
}

// ---------------------------------------------------------------------------
// AuthGate
// ---------------------------------------------------------------------------

/// Per-connection identification state machine.
#[derive(Debug)]
pub struct AuthGate {
    state: GateState,
    /// The configured account. Clients must claim the same one.
    account: String,
    /// Characters this bouncer manages.
    characters: HashSet<String>,
    /// At most one identification is in flight at a time.
    attempt: Option<Attempt>,
}

impl AuthGate {
    /// Creates a gate in `AwaitingIdentification`.
    pub fn new<I, S>(account: impl Into<String>, characters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state: GateState::AwaitingIdentification,
            account: account.into(),
            characters: characters.into_iter().map(Into::into).collect(),
            attempt: None,
        }
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    /// The bound character, once identified.
    pub fn character(&self) -> Option<&str> {
        match &self.state {
            GateState::Identified { character } => Some(character),
            _ => None,
        }
    }

    /// Returns `true` while an authenticator call is outstanding.
    pub fn is_authenticating(&self) -> bool {
        self.attempt.is_some()
    }

    /// Classifies one frame received from the client.
    pub fn on_frame(&mut self, frame: Frame) -> GateAction {
        match &self.state {
            GateState::Closed => GateAction::Ignore,

            GateState::Identified { .. } => match frame.code() {
                "IDN" => GateAction::Reject(ErrorCode::AlreadyIdentified),
                // Heartbeats are for the bouncer, not upstream.
                "PIN" => GateAction::Ignore,
                _ => GateAction::Relay(frame),
            },

            GateState::AwaitingIdentification => match frame.code() {
                "IDN" => self.begin_attempt(&frame),
                "PIN" => GateAction::Ignore,
                _ => GateAction::Reject(ErrorCode::NotLoggedIn),
            },
        }
    }

    fn begin_attempt(&mut self, frame: &Frame) -> GateAction {
        if self.attempt.is_some() {
            return GateAction::Reject(ErrorCode::AlreadyIdentified);
        }

        let attempt = match FrameCodec.decode::<ClientCommand>(frame) {
            Ok(ClientCommand::Idn {
                account,
                ticket,
                character,
                ..
            }) => Attempt {
                account,
                ticket,
                character,
            },
            Ok(_) | Err(_) => {
                tracing::debug!("malformed IDN from client");
                return GateAction::Reject(ErrorCode::IdentificationFailed);
            }
        };

        self.attempt = Some(attempt.clone());
        GateAction::Authenticate(attempt)
    }

    /// Feeds the authenticator's verdict for the pending attempt.
    pub fn on_auth_result(
        &mut self,
        verdict: Result<(), SessionError>,
    ) -> AuthOutcome {
        if self.state != GateState::AwaitingIdentification {
            self.attempt = None;
            return AuthOutcome::Cancelled;
        }
        let Some(attempt) = self.attempt.take() else {
            return AuthOutcome::Cancelled;
        };

        if !attempt.account.eq_ignore_ascii_case(&self.account) {
            return AuthOutcome::Rejected(ErrorCode::IdentificationFailed);
        }
        if let Err(e) = verdict {
            tracing::debug!(error = %e, "identification rejected");
            return AuthOutcome::Rejected(ErrorCode::IdentificationFailed);
        }
        if !self.characters.contains(&attempt.character) {
            return AuthOutcome::Rejected(ErrorCode::CharacterNotFound);
        }

        self.state = GateState::Identified {
            character: attempt.character.clone(),
        };
        AuthOutcome::Identified {
            character: attempt.character,
        }
    }

    /// The identification deadline fired. Returns `true` if the handler
    /// must close the socket.
    pub fn on_deadline(&mut self) -> bool {
        if self.state == GateState::AwaitingIdentification {
            self.state = GateState::Closed;
            self.attempt = None;
            true
        } else {
            false
        }
    }

    /// The socket closed. Returns the bound character, if any, so the
    /// handler can detach from its session. Idempotent.
    pub fn close(&mut self) -> Option<String> {
        self.attempt = None;
        match std::mem::replace(&mut self.state, GateState::Closed) {
            GateState::Identified { character } => Some(character),
            _ => None,
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Naming: `test_{operation}_{scenario}_{expected}`.

    use super::*;

    fn gate() -> AuthGate {
        AuthGate::new("Account", ["Alice", "Bob"])
    }

    fn frame(line: &str) -> Frame {
        Frame::parse(line).unwrap()
    }

    fn idn(account: &str, character: &str) -> Frame {
        frame(&format!(
            r#"IDN {{"method":"ticket","account":"{account}","ticket":"t","character":"{character}"}}"#
        ))
    }

    /// Drives a gate all the way to `Identified` as `character`.
    fn identified(character: &str) -> AuthGate {
        let mut g = gate();
        assert!(matches!(
            g.on_frame(idn("Account", character)),
            GateAction::Authenticate(_)
        ));
        assert_eq!(
            g.on_auth_result(Ok(())),
            AuthOutcome::Identified {
                character: character.into()
            }
        );
        g
    }

    // =====================================================================
    // on_frame() before identification
    // =====================================================================

    #[test]
    fn test_on_frame_non_idn_before_identification_is_not_logged_in() {
        let mut g = gate();
        let action = g.on_frame(frame(r#"MSG {"channel":"x","message":"y"}"#));
        assert_eq!(action, GateAction::Reject(ErrorCode::NotLoggedIn));
        assert_eq!(g.state(), &GateState::AwaitingIdentification);
    }

    #[test]
    fn test_on_frame_pin_before_identification_is_ignored() {
        let mut g = gate();
        assert_eq!(g.on_frame(frame("PIN")), GateAction::Ignore);
        assert_eq!(g.state(), &GateState::AwaitingIdentification);
    }

    #[test]
    fn test_on_frame_idn_asks_for_authentication() {
        let mut g = gate();
        let action = g.on_frame(idn("Account", "Alice"));
        assert_eq!(
            action,
            GateAction::Authenticate(Attempt {
                account: "Account".into(),
                ticket: "t".into(),
                character: "Alice".into(),
            })
        );
        assert!(g.is_authenticating());
    }

    #[test]
    fn test_on_frame_second_idn_while_pending_is_rejected() {
        let mut g = gate();
        g.on_frame(idn("Account", "Alice"));
        assert_eq!(
            g.on_frame(idn("Account", "Bob")),
            GateAction::Reject(ErrorCode::AlreadyIdentified)
        );
        // The first attempt is still the one in flight.
        assert_eq!(
            g.on_auth_result(Ok(())),
            AuthOutcome::Identified {
                character: "Alice".into()
            }
        );
    }

    #[test]
    fn test_on_frame_malformed_idn_fails_identification() {
        let mut g = gate();
        assert_eq!(
            g.on_frame(frame(r#"IDN {"account":"Account"}"#)),
            GateAction::Reject(ErrorCode::IdentificationFailed)
        );
        assert!(!g.is_authenticating());
    }

    // =====================================================================
    // on_auth_result()
    // =====================================================================

    #[test]
    fn test_on_auth_result_account_match_is_case_insensitive() {
        let mut g = gate();
        g.on_frame(idn("aCCOUNT", "Alice"));
        assert!(matches!(
            g.on_auth_result(Ok(())),
            AuthOutcome::Identified { .. }
        ));
    }

    #[test]
    fn test_on_auth_result_wrong_account_fails() {
        let mut g = gate();
        g.on_frame(idn("Someone", "Alice"));
        assert_eq!(
            g.on_auth_result(Ok(())),
            AuthOutcome::Rejected(ErrorCode::IdentificationFailed)
        );
        assert_eq!(g.state(), &GateState::AwaitingIdentification);
    }

    #[test]
    fn test_on_auth_result_rejected_ticket_fails_and_allows_retry() {
        let mut g = gate();
        g.on_frame(idn("Account", "Alice"));
        assert_eq!(
            g.on_auth_result(Err(SessionError::AuthFailed("bad".into()))),
            AuthOutcome::Rejected(ErrorCode::IdentificationFailed)
        );
        assert!(matches!(
            g.on_frame(idn("Account", "Alice")),
            GateAction::Authenticate(_)
        ));
    }

    #[test]
    fn test_on_auth_result_unmanaged_character_not_found() {
        let mut g = gate();
        g.on_frame(idn("Account", "Mallory"));
        assert_eq!(
            g.on_auth_result(Ok(())),
            AuthOutcome::Rejected(ErrorCode::CharacterNotFound)
        );
    }

    #[test]
    fn test_on_auth_result_after_close_is_cancelled() {
        let mut g = gate();
        g.on_frame(idn("Account", "Alice"));
        assert_eq!(g.close(), None);
        assert_eq!(g.on_auth_result(Ok(())), AuthOutcome::Cancelled);
        assert_eq!(g.state(), &GateState::Closed);
    }

    #[test]
    fn test_on_auth_result_without_attempt_is_cancelled() {
        let mut g = gate();
        assert_eq!(g.on_auth_result(Ok(())), AuthOutcome::Cancelled);
    }

    // =====================================================================
    // Identified
    // =====================================================================

    #[test]
    fn test_identified_second_idn_is_already_identified() {
        let mut g = identified("Alice");
        assert_eq!(
            g.on_frame(idn("Account", "Bob")),
            GateAction::Reject(ErrorCode::AlreadyIdentified)
        );
        assert_eq!(g.character(), Some("Alice"));
    }

    #[test]
    fn test_identified_frames_are_relayed() {
        let mut g = identified("Alice");
        let msg = frame(r#"MSG {"channel":"x","message":"y"}"#);
        assert_eq!(g.on_frame(msg.clone()), GateAction::Relay(msg));
    }

    #[test]
    fn test_identified_pin_is_swallowed() {
        let mut g = identified("Alice");
        assert_eq!(g.on_frame(frame("PIN")), GateAction::Ignore);
    }

    // =====================================================================
    // Termination: exactly one of identify / deadline / close
    // =====================================================================

    #[test]
    fn test_on_deadline_before_identification_closes() {
        let mut g = gate();
        assert!(g.on_deadline());
        assert_eq!(g.state(), &GateState::Closed);
        assert_eq!(g.on_frame(idn("Account", "Alice")), GateAction::Ignore);
    }

    #[test]
    fn test_on_deadline_after_identification_is_noop() {
        let mut g = identified("Alice");
        assert!(!g.on_deadline());
        assert_eq!(g.character(), Some("Alice"));
    }

    #[test]
    fn test_on_deadline_during_pending_attempt_cancels_it() {
        let mut g = gate();
        g.on_frame(idn("Account", "Alice"));
        assert!(g.on_deadline());
        assert_eq!(g.on_auth_result(Ok(())), AuthOutcome::Cancelled);
    }

    #[test]
    fn test_close_identified_returns_character_once() {
        let mut g = identified("Bob");
        assert_eq!(g.close(), Some("Bob".into()));
        assert_eq!(g.close(), None);
        assert!(!g.on_deadline());
    }
}
