//! Error types for the protocol layer.
//!
//! Each crate in chatbnc defines its own error enum. When you see a
//! `ProtocolError`, you know the problem is the shape of a frame or its
//! payload, not the network or the session behind it.

/// Errors that can occur while parsing, encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The raw line is not `<CODE>` or `<CODE> <payload>`.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The three-letter code is well formed but not one this command set
    /// knows. Relays pass such frames through untouched.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Serialization failed (turning a command into a line).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, missing required fields
    /// or wrong data types in the payload.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message is invalid at the protocol level even though it
    /// serialized fine.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
