//! Error types for the upstream layer.

use chatbnc_transport::TransportError;

/// Errors that can occur while running upstream sessions.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The ticket endpoint refused the credentials or couldn't be reached.
    #[error("ticket request failed: {0}")]
    Ticket(String),

    /// Dialing or talking to the chat service failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// More characters were configured than one bouncer manages.
    #[error("too many characters: {0} (at most 3)")]
    TooManyIdentities(usize),

    /// No session is configured for this identity.
    #[error("no session for character {0}")]
    UnknownIdentity(String),

    /// The session's command channel is closed (the actor has stopped).
    #[error("session for {0} is unavailable")]
    Unavailable(String),
}
