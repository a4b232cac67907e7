//! Error types for the session layer.

/// Errors that can occur while identifying a client.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The authentication service rejected the ticket, or the claimed
    /// account doesn't match the configured one.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The authentication service couldn't be reached or answered with
    /// something we can't interpret. Treated as a rejection by the gate.
    #[error("authentication service unavailable: {0}")]
    Unavailable(String),
}
