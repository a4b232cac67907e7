//! Unified error type for the bouncer.

use chatbnc_protocol::ProtocolError;
use chatbnc_session::SessionError;
use chatbnc_transport::TransportError;
use chatbnc_upstream::UpstreamError;

use crate::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum BouncerError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame that couldn't be parsed or encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Client identification failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// An upstream session failed or is gone.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
