//! Typed commands for the chat wire format.
//!
//! Two closed command sets travel on the wire:
//!
//! - [`ServerCommand`]: what the chat service sends (and what the bouncer
//!   synthesizes for its own clients: snapshots, errors, acks).
//! - [`ClientCommand`]: what a client sends. The bouncer only models the
//!   commands it acts on; everything else is relayed as a raw frame.
//!
//! Both enums are adjacently tagged as `{"code": "...", "data": {...}}`,
//! which [`FrameCodec`](crate::FrameCodec) maps to and from the
//! `CODE {...}` line form. Payload structs never deny unknown fields:
//! the service is free to add fields we don't track.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Command trait
// ---------------------------------------------------------------------------

/// A closed set of commands that a [`Codec`](crate::Codec) can map to
/// frames.
pub trait Command: Serialize + DeserializeOwned {
    /// Every code this set has a variant for.
    const CODES: &'static [&'static str];

    /// Returns `true` if `code` belongs to this command set.
    fn is_known(code: &str) -> bool {
        Self::CODES.contains(&code)
    }
}

// ---------------------------------------------------------------------------
// Shared payload pieces
// ---------------------------------------------------------------------------

/// A character's presence status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Online,
    Looking,
    Busy,
    Dnd,
    Idle,
    Away,
    Crown,
    Offline,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Online => "online",
            Self::Looking => "looking",
            Self::Busy => "busy",
            Self::Dnd => "dnd",
            Self::Idle => "idle",
            Self::Away => "away",
            Self::Crown => "crown",
            Self::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// Which kinds of messages a channel allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    Chat,
    Ads,
    #[default]
    Both,
}

/// `{"identity": "Name"}`, used by JCH and ICH.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterRef {
    pub identity: String,
}

impl CharacterRef {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }
}

/// One LIS entry: `[name, gender, status, status message]`.
///
/// A tuple struct, so serde writes it as a JSON array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry(pub String, pub String, pub Status, pub String);

/// One official channel in a CHA listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicChannel {
    pub name: String,
    #[serde(default)]
    pub mode: ChannelMode,
    #[serde(default)]
    pub characters: u32,
}

/// One open private room in an ORS listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRoom {
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub characters: u32,
}

/// The IGN payload. The `action` field picks the shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum IgnoreUpdate {
    /// Full replacement of the ignore list.
    Init { characters: Vec<String> },
    Add { character: String },
    Delete { character: String },
    /// Same shape as `Init`; sent in reply to a client's list request.
    List { characters: Vec<String> },
    /// Tells a character they're being ignored.
    Notify { character: String },
}

// ---------------------------------------------------------------------------
// ServerCommand
// ---------------------------------------------------------------------------

/// Commands the chat service sends to a connected character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", content = "data", rename_all = "UPPERCASE")]
pub enum ServerCommand {
    /// Identification acknowledged.
    Idn { character: String },
    Err { number: u32, message: String },
    /// Keepalive; answered with a client `PIN`.
    Pin,
    /// Welcome notice.
    Hlo { message: String },
    /// Online character count.
    Con { count: usize },
    /// Friends (and bookmarks) list.
    Frl { characters: Vec<String> },
    Ign(IgnoreUpdate),
    /// Global operator list.
    Adl { ops: Vec<String> },
    Aop { character: String },
    Dop { character: String },
    /// A page of the online-character directory.
    Lis { characters: Vec<ListEntry> },
    /// A character came online.
    Nln {
        identity: String,
        gender: String,
        status: Status,
    },
    /// A character went offline.
    Fln { character: String },
    Sta {
        character: String,
        status: Status,
        #[serde(default)]
        statusmsg: String,
    },
    /// Someone (possibly us) joined a channel.
    Jch {
        character: CharacterRef,
        channel: String,
        #[serde(default)]
        title: String,
    },
    Lch { channel: String, character: String },
    /// Channel operators, owner first.
    Col { channel: String, oplist: Vec<String> },
    /// Initial channel member list.
    Ich {
        users: Vec<CharacterRef>,
        channel: String,
        #[serde(default)]
        mode: ChannelMode,
    },
    /// Channel description.
    Cds { channel: String, description: String },
    Cha { channels: Vec<PublicChannel> },
    Ors { channels: Vec<OpenRoom> },
    /// Channel message.
    Msg {
        character: String,
        message: String,
        channel: String,
    },
    /// Channel ad.
    Lrp {
        character: String,
        message: String,
        channel: String,
    },
    /// Private message.
    Pri { character: String, message: String },
    /// Dice or bottle roll, in a channel or a private conversation.
    Rll {
        character: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient: Option<String>,
    },
    /// Server variable.
    Var {
        variable: String,
        value: serde_json::Value,
    },
    /// Channel mode change.
    Rmo { mode: ChannelMode, channel: String },
    /// Channel operator promoted.
    Coa { character: String, channel: String },
    /// Channel operator demoted.
    Cor { character: String, channel: String },
    /// Channel owner changed.
    Cso { character: String, channel: String },
    /// Kicked from a channel.
    Cku {
        operator: String,
        channel: String,
        character: String,
    },
    /// Banned from a channel.
    Cbu {
        operator: String,
        channel: String,
        character: String,
    },
}

impl Command for ServerCommand {
    const CODES: &'static [&'static str] = &[
        "IDN", "ERR", "PIN", "HLO", "CON", "FRL", "IGN", "ADL", "AOP", "DOP",
        "LIS", "NLN", "FLN", "STA", "JCH", "LCH", "COL", "ICH", "CDS", "CHA",
        "ORS", "MSG", "LRP", "PRI", "RLL", "VAR", "RMO", "COA", "COR", "CSO",
        "CKU", "CBU",
    ];
}

// ---------------------------------------------------------------------------
// ClientCommand
// ---------------------------------------------------------------------------

/// Commands a client sends that the bouncer needs to understand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", content = "data", rename_all = "UPPERCASE")]
pub enum ClientCommand {
    /// Identification. Local clients and the bouncer's own upstream login
    /// both use the ticket method.
    Idn {
        #[serde(default)]
        method: String,
        account: String,
        ticket: String,
        character: String,
        #[serde(default)]
        cname: String,
        #[serde(default)]
        cversion: String,
    },
    Pin,
    Msg { channel: String, message: String },
    Lrp { channel: String, message: String },
    Pri { recipient: String, message: String },
    /// Own status change.
    Sta { status: Status, statusmsg: String },
    /// Request the official channel list.
    Cha,
    /// Request the open room list.
    Ors,
}

impl Command for ClientCommand {
    const CODES: &'static [&'static str] =
        &["IDN", "PIN", "MSG", "LRP", "PRI", "STA", "CHA", "ORS"];
}

// ---------------------------------------------------------------------------
// Message kinds
// ---------------------------------------------------------------------------

/// The message-like commands that matter for replay and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// MSG
    Channel,
    /// LRP
    Ad,
    /// PRI
    Private,
    /// RLL
    Roll,
}

impl MessageKind {
    /// Classifies a command code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "MSG" => Some(Self::Channel),
            "LRP" => Some(Self::Ad),
            "PRI" => Some(Self::Private),
            "RLL" => Some(Self::Roll),
            _ => None,
        }
    }

    /// Whether an upstream frame of this kind goes into the replay buffer.
    /// Ads are logged but not replayed.
    pub fn is_replayable(self) -> bool {
        !matches!(self, Self::Ad)
    }

    /// Whether a client sending this kind makes the replay buffer stale.
    pub fn clears_replay(self) -> bool {
        !matches!(self, Self::Roll)
    }
}

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// The `ERR` numbers the bouncer itself produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// A command other than IDN arrived before identification.
    NotLoggedIn,
    /// Account mismatch or ticket rejected.
    IdentificationFailed,
    /// The requested character isn't managed by this bouncer.
    CharacterNotFound,
    /// IDN after a successful (or in-flight) identification.
    AlreadyIdentified,
}

impl ErrorCode {
    pub fn number(self) -> u32 {
        match self {
            Self::NotLoggedIn => 3,
            Self::IdentificationFailed => 4,
            Self::CharacterNotFound => 6,
            Self::AlreadyIdentified => 11,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::NotLoggedIn => "This command requires that you have logged in.",
            Self::IdentificationFailed => "Identification failed.",
            Self::CharacterNotFound => "The character requested was not found.",
            Self::AlreadyIdentified => "Already identified.",
        }
    }

    /// The `ERR` command carrying this code.
    pub fn to_command(self) -> ServerCommand {
        ServerCommand::Err {
            number: self.number(),
            message: self.message().to_owned(),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! JSON shapes. A mismatch here means real chat clients can't parse
    //! what the bouncer sends them.

    use super::*;
    use crate::{Codec, Frame, FrameCodec};

    fn decode_server(line: &str) -> ServerCommand {
        FrameCodec.decode(&Frame::parse(line).unwrap()).unwrap()
    }

    fn payload_of(cmd: &ServerCommand) -> serde_json::Value {
        let frame = FrameCodec.encode(cmd).unwrap();
        serde_json::from_str(frame.payload().unwrap()).unwrap()
    }

    #[test]
    fn test_every_server_code_is_unique() {
        let mut codes = ServerCommand::CODES.to_vec();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), ServerCommand::CODES.len());
    }

    #[test]
    fn test_err_payload_shape() {
        let json = payload_of(&ErrorCode::AlreadyIdentified.to_command());
        assert_eq!(json["number"], 11);
        assert_eq!(json["message"], "Already identified.");
    }

    #[test]
    fn test_error_code_numbers() {
        assert_eq!(ErrorCode::NotLoggedIn.number(), 3);
        assert_eq!(ErrorCode::IdentificationFailed.number(), 4);
        assert_eq!(ErrorCode::CharacterNotFound.number(), 6);
        assert_eq!(ErrorCode::AlreadyIdentified.number(), 11);
    }

    #[test]
    fn test_lis_entries_are_arrays() {
        let cmd = ServerCommand::Lis {
            characters: vec![ListEntry(
                "Alice".into(),
                "Female".into(),
                Status::Looking,
                "hi".into(),
            )],
        };
        let json = payload_of(&cmd);
        assert_eq!(
            json["characters"],
            serde_json::json!([["Alice", "Female", "looking", "hi"]])
        );
    }

    #[test]
    fn test_ign_init_shape() {
        let cmd = ServerCommand::Ign(IgnoreUpdate::Init {
            characters: vec!["Bob".into()],
        });
        let json = payload_of(&cmd);
        assert_eq!(json["action"], "init");
        assert_eq!(json["characters"], serde_json::json!(["Bob"]));
    }

    #[test]
    fn test_decode_ign_add() {
        let cmd = decode_server(r#"IGN {"action":"add","character":"Bob"}"#);
        assert_eq!(
            cmd,
            ServerCommand::Ign(IgnoreUpdate::Add {
                character: "Bob".into()
            })
        );
    }

    #[test]
    fn test_decode_msg_ignores_extra_fields() {
        let cmd = decode_server(
            r#"MSG {"character":"Bob","message":"hey","channel":"Frontpage","extra":1}"#,
        );
        assert_eq!(
            cmd,
            ServerCommand::Msg {
                character: "Bob".into(),
                message: "hey".into(),
                channel: "Frontpage".into(),
            }
        );
    }

    #[test]
    fn test_decode_private_roll_without_channel() {
        let cmd = decode_server(
            r#"RLL {"character":"Bob","message":"rolls 1d6","recipient":"Alice","type":"dice"}"#,
        );
        match cmd {
            ServerCommand::Rll {
                channel, recipient, ..
            } => {
                assert_eq!(channel, None);
                assert_eq!(recipient.as_deref(), Some("Alice"));
            }
            other => panic!("expected RLL, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_sta_defaults_missing_statusmsg() {
        let cmd = decode_server(r#"STA {"character":"Bob","status":"busy"}"#);
        assert_eq!(
            cmd,
            ServerCommand::Sta {
                character: "Bob".into(),
                status: Status::Busy,
                statusmsg: String::new(),
            }
        );
    }

    #[test]
    fn test_jch_nests_identity() {
        let json = payload_of(&ServerCommand::Jch {
            character: CharacterRef::new("Alice"),
            channel: "ADH-1".into(),
            title: "Room".into(),
        });
        assert_eq!(json["character"]["identity"], "Alice");
    }

    #[test]
    fn test_var_keeps_arbitrary_value() {
        let cmd = decode_server(r#"VAR {"variable":"icon_blacklist","value":["a","b"]}"#);
        match cmd {
            ServerCommand::Var { variable, value } => {
                assert_eq!(variable, "icon_blacklist");
                assert_eq!(value, serde_json::json!(["a", "b"]));
            }
            other => panic!("expected VAR, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_client_idn() {
        let frame = Frame::parse(
            r#"IDN {"method":"ticket","account":"acc","ticket":"t","character":"Alice","cname":"c","cversion":"1"}"#,
        )
        .unwrap();
        let cmd: ClientCommand = FrameCodec.decode(&frame).unwrap();
        assert!(matches!(cmd, ClientCommand::Idn { ref character, .. } if character == "Alice"));
    }

    #[test]
    fn test_client_sta_encodes_status_lowercase() {
        let frame = FrameCodec
            .encode(&ClientCommand::Sta {
                status: Status::Idle,
                statusmsg: "Disconnected".into(),
            })
            .unwrap();
        assert_eq!(frame.code(), "STA");
        let json: serde_json::Value =
            serde_json::from_str(frame.payload().unwrap()).unwrap();
        assert_eq!(json["status"], "idle");
        assert_eq!(json["statusmsg"], "Disconnected");
    }

    #[test]
    fn test_message_kind_policies() {
        assert_eq!(MessageKind::from_code("MSG"), Some(MessageKind::Channel));
        assert_eq!(MessageKind::from_code("STA"), None);
        assert!(MessageKind::Roll.is_replayable());
        assert!(!MessageKind::Ad.is_replayable());
        assert!(MessageKind::Ad.clears_replay());
        assert!(!MessageKind::Roll.clears_replay());
    }

    #[test]
    fn test_status_display_matches_wire() {
        assert_eq!(Status::Dnd.to_string(), "dnd");
        assert_eq!(
            serde_json::to_string(&Status::Dnd).unwrap(),
            "\"dnd\""
        );
    }
}
