//! # chatbnc
//!
//! A bouncer for a line-based chat service: it keeps one persistent login
//! per managed character and lets any number of local clients share it.
//!
//! Clients connect over WebSocket, identify with `IDN` like they would
//! against the real service, and are attached to the character's upstream
//! session. They receive a snapshot of the current chat state, then the
//! messages they missed, then live traffic.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chatbnc::prelude::*;
//!
//! # async fn start() -> Result<(), BouncerError> {
//! let config = Config::load("chatbnc.toml")?;
//! let bouncer = Bouncer::from_config(&config).await?;
//! bouncer.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod server;

pub use config::{Config, ConfigError};
pub use error::BouncerError;
pub use server::{Bouncer, BouncerBuilder};

pub mod prelude {
    pub use crate::{Bouncer, BouncerBuilder, BouncerError, Config, ConfigError};
    pub use chatbnc_protocol::{
        ClientCommand, Codec, ErrorCode, Frame, FrameCodec, ServerCommand,
        Status,
    };
    pub use chatbnc_session::{
        Authenticator, SessionError, TicketAuthenticator,
    };
    pub use chatbnc_transport::{Connection, ConnectionId, TransportError};
    pub use chatbnc_upstream::{
        FileLogger, LogPolicy, MessageLogger, NoopLogger, SessionConfig,
        SessionHandle, SessionPool, Ticket, TicketProvider,
        UpstreamConnector, UpstreamError,
    };
}
