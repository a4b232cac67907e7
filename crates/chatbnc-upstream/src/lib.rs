//! Upstream sessions for chatbnc.
//!
//! Each managed character keeps one long-lived login to the chat service,
//! running as an isolated Tokio task (actor model) that any number of
//! local clients attach to.
//!
//! # Key types
//!
//! - [`SessionPool`]: one session per managed character
//! - [`SessionHandle`]: attach, detach and relay through a running session
//! - [`ReplayBuffer`]: recent messages replayed to new clients
//! - [`ChatState`]: tracked chat state, replayed as a snapshot
//! - [`TicketProvider`] / [`UpstreamConnector`]: how a session logs in
//! - [`MessageLogger`] / [`LogPolicy`]: message logs

mod config;
mod connector;
mod directory;
mod error;
mod log;
mod pool;
mod replay;
mod session;
mod state;
mod ticket;

pub use config::{LinkState, SessionConfig};
pub use connector::{UpstreamConnector, WebSocketConnector};
pub use directory::Directory;
pub use error::UpstreamError;
pub use log::{FileLogger, LogEntry, LogPolicy, MessageLogger, NoopLogger};
pub use pool::{MAX_IDENTITIES, SessionPool};
pub use replay::ReplayBuffer;
pub use session::{
    Attachment, ClientHandle, ClientOutbound, ClientSender,
    DEFAULT_CHANNEL_SIZE, IDLE_STATUS_MESSAGE, SessionHandle, SessionInfo,
    spawn_session,
};
pub use state::{Channel, Character, ChatState, LIS_CHUNK};
pub use ticket::{ApiTicketProvider, DEFAULT_TICKET_URL, Ticket, TicketProvider};
