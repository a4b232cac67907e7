//! Frames and the codec that maps them to typed commands.
//!
//! A [`Frame`] is one line of the chat protocol exactly as it travelled
//! on the wire: a three-letter code, optionally followed by a space and a
//! JSON payload.
//!
//! ```text
//! PIN
//! MSG {"channel":"Frontpage","message":"hello"}
//! ^^^ ^-------------- payload ----------------^
//! code
//! ```
//!
//! Frames are what the bouncer relays and buffers: they keep the original
//! text so forwarding is byte-for-byte verbatim. The [`Codec`] only comes
//! in when something needs to *look inside* a frame (state tracking,
//! logging, the identification handshake) or synthesize a new one
//! (snapshots, errors).

use std::fmt;

use serde_json::{Map, Value};

use crate::{Command, ProtocolError};

/// Length of a command code.
const CODE_LEN: usize = 3;

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One validated protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    text: String,
}

impl Frame {
    /// Validates a raw line.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidFrame`] if the line doesn't start
    /// with three uppercase ASCII letters, or if the code is followed by
    /// anything other than a single space.
    pub fn parse(text: impl Into<String>) -> Result<Self, ProtocolError> {
        let text = text.into();
        let bytes = text.as_bytes();

        if bytes.len() < CODE_LEN
            || !bytes[..CODE_LEN].iter().all(u8::is_ascii_uppercase)
        {
            return Err(ProtocolError::InvalidFrame(truncate(&text)));
        }
        if bytes.len() > CODE_LEN && bytes[CODE_LEN] != b' ' {
            return Err(ProtocolError::InvalidFrame(truncate(&text)));
        }

        Ok(Self { text })
    }

    /// The three-letter command code.
    pub fn code(&self) -> &str {
        &self.text[..CODE_LEN]
    }

    /// The JSON payload, if any. Whitespace-only payloads count as absent.
    pub fn payload(&self) -> Option<&str> {
        self.text
            .get(CODE_LEN + 1..)
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    /// The full line as received.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Consumes the frame, returning the full line.
    pub fn into_string(self) -> String {
        self.text
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Keeps error messages readable when a client sends a huge blob.
fn truncate(text: &str) -> String {
    text.chars().take(32).collect()
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Converts between frames and a typed [`Command`] set.
///
/// The protocol layer doesn't care which command set is used: the bouncer
/// decodes upstream traffic as `ServerCommand` and client traffic as
/// `ClientCommand` with the same codec.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a command into a frame.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Command>(&self, value: &T) -> Result<Frame, ProtocolError>;

    /// Deserializes a frame into a command.
    ///
    /// # Errors
    /// - `ProtocolError::UnknownCommand` if `T` has no variant for the code
    /// - `ProtocolError::Decode` if the payload doesn't match the variant
    fn decode<T: Command>(&self, frame: &Frame) -> Result<T, ProtocolError>;
}

/// The JSON-payload [`Codec`] used on the wire.
///
/// Command enums are adjacently tagged (`code` / `data`), so a frame
/// `MSG {"channel":"x","message":"y"}` is rebuilt as
/// `{"code":"MSG","data":{"channel":"x","message":"y"}}` before handing it
/// to serde, and the reverse on the way out.
///
/// ```rust
/// use chatbnc_protocol::{Codec, Frame, FrameCodec, ServerCommand};
///
/// let codec = FrameCodec;
/// let frame = codec
///     .encode(&ServerCommand::Hlo { message: "hi".into() })
///     .unwrap();
/// assert_eq!(frame.as_str(), r#"HLO {"message":"hi"}"#);
///
/// let decoded: ServerCommand = codec.decode(&frame).unwrap();
/// assert_eq!(decoded, ServerCommand::Hlo { message: "hi".into() });
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl Codec for FrameCodec {
    fn encode<T: Command>(&self, value: &T) -> Result<Frame, ProtocolError> {
        let tagged = serde_json::to_value(value).map_err(ProtocolError::Encode)?;
        let Value::Object(mut map) = tagged else {
            return Err(ProtocolError::InvalidMessage(
                "command did not serialize to a tagged object".into(),
            ));
        };
        let code = match map.remove("code") {
            Some(Value::String(code)) => code,
            _ => {
                return Err(ProtocolError::InvalidMessage(
                    "command is missing its code".into(),
                ));
            }
        };

        let text = match map.remove("data") {
            Some(data) => {
                let payload =
                    serde_json::to_string(&data).map_err(ProtocolError::Encode)?;
                format!("{code} {payload}")
            }
            None => code,
        };
        Frame::parse(text)
    }

    fn decode<T: Command>(&self, frame: &Frame) -> Result<T, ProtocolError> {
        let code = frame.code();
        if !T::is_known(code) {
            return Err(ProtocolError::UnknownCommand(code.to_owned()));
        }

        let mut map = Map::new();
        map.insert("code".into(), Value::String(code.to_owned()));
        if let Some(payload) = frame.payload() {
            let data: Value =
                serde_json::from_str(payload).map_err(ProtocolError::Decode)?;
            map.insert("data".into(), data);
        }
        serde_json::from_value(Value::Object(map)).map_err(ProtocolError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientCommand, ServerCommand};

    // =====================================================================
    // Frame::parse
    // =====================================================================

    #[test]
    fn test_parse_bare_code() {
        let frame = Frame::parse("PIN").unwrap();
        assert_eq!(frame.code(), "PIN");
        assert_eq!(frame.payload(), None);
    }

    #[test]
    fn test_parse_code_with_payload() {
        let frame = Frame::parse(r#"CON {"count":5}"#).unwrap();
        assert_eq!(frame.code(), "CON");
        assert_eq!(frame.payload(), Some(r#"{"count":5}"#));
        assert_eq!(frame.as_str(), r#"CON {"count":5}"#);
    }

    #[test]
    fn test_parse_trailing_space_has_no_payload() {
        let frame = Frame::parse("PIN ").unwrap();
        assert_eq!(frame.payload(), None);
    }

    #[test]
    fn test_parse_rejects_short_and_lowercase_codes() {
        assert!(matches!(Frame::parse("PI"), Err(ProtocolError::InvalidFrame(_))));
        assert!(matches!(Frame::parse("pin"), Err(ProtocolError::InvalidFrame(_))));
        assert!(matches!(Frame::parse(""), Err(ProtocolError::InvalidFrame(_))));
    }

    #[test]
    fn test_parse_rejects_missing_separator() {
        assert!(matches!(
            Frame::parse(r#"MSG{"a":1}"#),
            Err(ProtocolError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_parse_rejects_multibyte_code_without_panicking() {
        assert!(Frame::parse("ÄB").is_err());
        assert!(Frame::parse("AB€ x").is_err());
    }

    // =====================================================================
    // FrameCodec
    // =====================================================================

    #[test]
    fn test_encode_unit_command_has_no_payload() {
        let frame = FrameCodec.encode(&ServerCommand::Pin).unwrap();
        assert_eq!(frame.as_str(), "PIN");
    }

    #[test]
    fn test_decode_unit_command_without_payload() {
        let frame = Frame::parse("PIN").unwrap();
        let cmd: ClientCommand = FrameCodec.decode(&frame).unwrap();
        assert_eq!(cmd, ClientCommand::Pin);
    }

    #[test]
    fn test_decode_unknown_code_is_reported_separately() {
        let frame = Frame::parse(r#"ZZZ {"x":1}"#).unwrap();
        let result: Result<ServerCommand, _> = FrameCodec.decode(&frame);
        assert!(matches!(result, Err(ProtocolError::UnknownCommand(c)) if c == "ZZZ"));
    }

    #[test]
    fn test_decode_malformed_payload_is_decode_error() {
        let frame = Frame::parse("MSG {not json").unwrap();
        let result: Result<ClientCommand, _> = FrameCodec.decode(&frame);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_decode_missing_payload_for_struct_variant_fails() {
        let frame = Frame::parse("MSG").unwrap();
        let result: Result<ClientCommand, _> = FrameCodec.decode(&frame);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
