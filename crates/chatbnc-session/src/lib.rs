//! Client identification for chatbnc.
//!
//! Every local client connection goes through the same short lifecycle:
//!
//! 1. **Identification**: the client must send `IDN` within
//!    [`IDENTIFY_TIMEOUT`] ([`AuthGate`]).
//! 2. **Authentication**: the ticket is checked against the chat service
//!    ([`Authenticator`] trait, [`TicketAuthenticator`]).
//! 3. **Binding**: once identified, the connection is attached to the
//!    upstream session of the character it asked for.
//!
//! # How it fits in the stack
//!
//! ```text
//! Upstream Layer (above)  ← sessions that identified connections attach to
//!     ↕
//! Session Layer (this crate)  ← decides who a connection is
//!     ↕
//! Protocol Layer (below)  ← provides Frame, ClientCommand, ErrorCode
//! ```

mod auth;
mod error;
mod gate;

pub use auth::{Authenticator, DEFAULT_AUTH_URL, TicketAuthenticator};
pub use error::SessionError;
pub use gate::{
    Attempt, AuthGate, AuthOutcome, GateAction, GateState, IDENTIFY_TIMEOUT,
    KEEPALIVE_INTERVAL,
};
