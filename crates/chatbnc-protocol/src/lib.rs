//! Wire protocol for chatbnc.
//!
//! This crate defines the "language" spoken on both sides of the bouncer:
//!
//! - **Frames** ([`Frame`]) — one validated protocol line, kept verbatim.
//! - **Types** ([`ServerCommand`], [`ClientCommand`], [`ErrorCode`], ...) —
//!   closed unions over the commands the bouncer understands.
//! - **Codec** ([`Codec`] trait, [`FrameCodec`]) — how commands map to and
//!   from frames.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! ```text
//! Transport (text) → Protocol (Frame / Command) → Session + Upstream
//! ```
//!
//! The protocol layer doesn't know about connections or sessions. It only
//! knows how lines are shaped.

mod codec;
mod error;
mod types;

pub use codec::{Codec, Frame, FrameCodec};
pub use error::ProtocolError;
pub use types::{
    ChannelMode, CharacterRef, ClientCommand, Command, ErrorCode,
    IgnoreUpdate, ListEntry, MessageKind, OpenRoom, PublicChannel,
    ServerCommand, Status,
};
