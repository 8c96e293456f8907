//! Transport message type codes and the generic transport messages
//! (RFC 4253 Sections 11 and 12).
//!
//! # Message Number Ranges
//!
//! - **1-19**: transport layer generic (disconnect, ignore, debug, service)
//! - **20-29**: algorithm negotiation (KEXINIT, NEWKEYS)
//! - **30-49**: key exchange method specific
//! - **50-79**: user authentication
//! - **80-127**: connection protocol (channels)
//!
//! The transport handles the generic messages internally; everything else
//! is routed by range to the registered upper-layer consumer.

use crate::ssh::wire::WireBuffer;
use skiff_platform::{SkiffError, SkiffResult};

/// SSH message type codes handled by the transport itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Disconnect message - terminates the connection.
    Disconnect = 1,
    /// Ignore message - padding or keep-alive, discarded on receipt.
    Ignore = 2,
    /// Unimplemented message - response to an unknown message type.
    Unimplemented = 3,
    /// Debug message - free-form debugging information.
    Debug = 4,
    /// Service request - request a service (e.g., "ssh-userauth").
    ServiceRequest = 5,
    /// Service accept - service request granted.
    ServiceAccept = 6,
    /// Key exchange init - algorithm negotiation.
    KexInit = 20,
    /// New keys - switch to the freshly derived key material.
    NewKeys = 21,
    /// DH/ECDH key exchange init (client's ephemeral value).
    KexDhInit = 30,
    /// DH/ECDH key exchange reply (host key, server ephemeral, signature).
    KexDhReply = 31,
}

impl MessageType {
    /// Converts a byte to a message type.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(MessageType::Disconnect),
            2 => Some(MessageType::Ignore),
            3 => Some(MessageType::Unimplemented),
            4 => Some(MessageType::Debug),
            5 => Some(MessageType::ServiceRequest),
            6 => Some(MessageType::ServiceAccept),
            20 => Some(MessageType::KexInit),
            21 => Some(MessageType::NewKeys),
            30 => Some(MessageType::KexDhInit),
            31 => Some(MessageType::KexDhReply),
            _ => None,
        }
    }

    /// Returns the protocol name of this message type.
    pub fn name(&self) -> &'static str {
        match self {
            MessageType::Disconnect => "SSH_MSG_DISCONNECT",
            MessageType::Ignore => "SSH_MSG_IGNORE",
            MessageType::Unimplemented => "SSH_MSG_UNIMPLEMENTED",
            MessageType::Debug => "SSH_MSG_DEBUG",
            MessageType::ServiceRequest => "SSH_MSG_SERVICE_REQUEST",
            MessageType::ServiceAccept => "SSH_MSG_SERVICE_ACCEPT",
            MessageType::KexInit => "SSH_MSG_KEXINIT",
            MessageType::NewKeys => "SSH_MSG_NEWKEYS",
            MessageType::KexDhInit => "SSH_MSG_KEXDH_INIT",
            MessageType::KexDhReply => "SSH_MSG_KEXDH_REPLY",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), *self as u8)
    }
}

/// Coarse routing class of a message type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageClass {
    /// Handled inside the transport (1-19, 20-29).
    Transport,
    /// Key exchange method specific (30-49); consumed by the active
    /// key exchanger while a handshake runs.
    KexMethod,
    /// User authentication layer (50-79).
    UserAuth,
    /// Connection/channel layer (80-127).
    Connection,
    /// Outside every assigned range.
    Unknown,
}

impl MessageClass {
    /// Classifies a raw message type byte by its numeric range.
    pub fn of(msg_type: u8) -> Self {
        match msg_type {
            1..=29 => MessageClass::Transport,
            30..=49 => MessageClass::KexMethod,
            50..=79 => MessageClass::UserAuth,
            80..=127 => MessageClass::Connection,
            _ => MessageClass::Unknown,
        }
    }
}

/// Disconnect reason codes (RFC 4253 Section 11.1, subset).
pub mod disconnect_reason {
    /// SSH_DISCONNECT_PROTOCOL_ERROR
    pub const PROTOCOL_ERROR: u32 = 2;
    /// SSH_DISCONNECT_KEY_EXCHANGE_FAILED
    pub const KEY_EXCHANGE_FAILED: u32 = 3;
    /// SSH_DISCONNECT_MAC_ERROR
    pub const MAC_ERROR: u32 = 5;
    /// SSH_DISCONNECT_COMPRESSION_ERROR
    pub const COMPRESSION_ERROR: u32 = 6;
    /// SSH_DISCONNECT_PROTOCOL_VERSION_NOT_SUPPORTED
    pub const PROTOCOL_VERSION_NOT_SUPPORTED: u32 = 8;
    /// SSH_DISCONNECT_HOST_KEY_NOT_VERIFIABLE
    pub const HOST_KEY_NOT_VERIFIABLE: u32 = 9;
    /// SSH_DISCONNECT_CONNECTION_LOST
    pub const CONNECTION_LOST: u32 = 10;
    /// SSH_DISCONNECT_BY_APPLICATION
    pub const BY_APPLICATION: u32 = 11;
}

/// SSH_MSG_DISCONNECT payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    /// Reason code (see [`disconnect_reason`]).
    pub code: u32,
    /// Human-readable description.
    pub description: String,
    /// Language tag (usually empty).
    pub language: String,
}

impl Disconnect {
    /// Creates a disconnect message with an empty language tag.
    pub fn new(code: u32, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            language: String::new(),
        }
    }

    /// Serializes including the leading type byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = WireBuffer::new();
        buf.write_u8(MessageType::Disconnect as u8);
        buf.write_u32(self.code);
        buf.write_string(&self.description);
        buf.write_string(&self.language);
        buf.into_vec()
    }

    /// Parses from a payload including the leading type byte.
    pub fn from_bytes(data: &[u8]) -> SkiffResult<Self> {
        let mut buf = WireBuffer::from(data);
        expect_type(&mut buf, MessageType::Disconnect)?;
        Ok(Self {
            code: buf.read_u32()?,
            description: buf.read_string()?,
            language: buf.read_string().unwrap_or_default(),
        })
    }
}

/// SSH_MSG_IGNORE payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ignore {
    /// Arbitrary data, discarded by the receiver.
    pub data: Vec<u8>,
}

impl Ignore {
    /// Serializes including the leading type byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = WireBuffer::new();
        buf.write_u8(MessageType::Ignore as u8);
        buf.write_bytes(&self.data);
        buf.into_vec()
    }

    /// Parses from a payload including the leading type byte.
    pub fn from_bytes(data: &[u8]) -> SkiffResult<Self> {
        let mut buf = WireBuffer::from(data);
        expect_type(&mut buf, MessageType::Ignore)?;
        Ok(Self {
            data: buf.read_bytes()?,
        })
    }
}

/// SSH_MSG_DEBUG payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Debug {
    /// Whether the receiver should display the message.
    pub always_display: bool,
    /// Debug text.
    pub message: String,
    /// Language tag (usually empty).
    pub language: String,
}

impl Debug {
    /// Creates a debug message with an empty language tag.
    pub fn new(always_display: bool, message: impl Into<String>) -> Self {
        Self {
            always_display,
            message: message.into(),
            language: String::new(),
        }
    }

    /// Serializes including the leading type byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = WireBuffer::new();
        buf.write_u8(MessageType::Debug as u8);
        buf.write_bool(self.always_display);
        buf.write_string(&self.message);
        buf.write_string(&self.language);
        buf.into_vec()
    }

    /// Parses from a payload including the leading type byte.
    pub fn from_bytes(data: &[u8]) -> SkiffResult<Self> {
        let mut buf = WireBuffer::from(data);
        expect_type(&mut buf, MessageType::Debug)?;
        Ok(Self {
            always_display: buf.read_bool()?,
            message: buf.read_string()?,
            language: buf.read_string().unwrap_or_default(),
        })
    }
}

/// SSH_MSG_UNIMPLEMENTED payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unimplemented {
    /// Sequence number of the rejected packet.
    pub sequence: u32,
}

impl Unimplemented {
    /// Serializes including the leading type byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = WireBuffer::new();
        buf.write_u8(MessageType::Unimplemented as u8);
        buf.write_u32(self.sequence);
        buf.into_vec()
    }

    /// Parses from a payload including the leading type byte.
    pub fn from_bytes(data: &[u8]) -> SkiffResult<Self> {
        let mut buf = WireBuffer::from(data);
        expect_type(&mut buf, MessageType::Unimplemented)?;
        Ok(Self {
            sequence: buf.read_u32()?,
        })
    }
}

/// SSH_MSG_SERVICE_REQUEST payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    /// Requested service name (e.g., "ssh-userauth").
    pub name: String,
}

impl ServiceRequest {
    /// Serializes including the leading type byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = WireBuffer::new();
        buf.write_u8(MessageType::ServiceRequest as u8);
        buf.write_string(&self.name);
        buf.into_vec()
    }

    /// Parses from a payload including the leading type byte.
    pub fn from_bytes(data: &[u8]) -> SkiffResult<Self> {
        let mut buf = WireBuffer::from(data);
        expect_type(&mut buf, MessageType::ServiceRequest)?;
        Ok(Self {
            name: buf.read_string()?,
        })
    }
}

/// SSH_MSG_SERVICE_ACCEPT payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccept {
    /// Accepted service name.
    pub name: String,
}

impl ServiceAccept {
    /// Serializes including the leading type byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = WireBuffer::new();
        buf.write_u8(MessageType::ServiceAccept as u8);
        buf.write_string(&self.name);
        buf.into_vec()
    }

    /// Parses from a payload including the leading type byte.
    pub fn from_bytes(data: &[u8]) -> SkiffResult<Self> {
        let mut buf = WireBuffer::from(data);
        expect_type(&mut buf, MessageType::ServiceAccept)?;
        Ok(Self {
            name: buf.read_string()?,
        })
    }
}

fn expect_type(buf: &mut WireBuffer, expected: MessageType) -> SkiffResult<()> {
    let got = buf.read_u8()?;
    if got != expected as u8 {
        return Err(SkiffError::Protocol(format!(
            "expected {} but got message type {}",
            expected, got
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_conversion() {
        assert_eq!(MessageType::from_u8(20), Some(MessageType::KexInit));
        assert_eq!(MessageType::from_u8(21), Some(MessageType::NewKeys));
        assert_eq!(MessageType::from_u8(255), None);
    }

    #[test]
    fn test_message_class_ranges() {
        assert_eq!(MessageClass::of(2), MessageClass::Transport);
        assert_eq!(MessageClass::of(21), MessageClass::Transport);
        assert_eq!(MessageClass::of(30), MessageClass::KexMethod);
        assert_eq!(MessageClass::of(50), MessageClass::UserAuth);
        assert_eq!(MessageClass::of(94), MessageClass::Connection);
        assert_eq!(MessageClass::of(200), MessageClass::Unknown);
    }

    #[test]
    fn test_disconnect_round_trip() {
        let msg = Disconnect::new(disconnect_reason::BY_APPLICATION, "closing");
        let parsed = Disconnect::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_ignore_round_trip() {
        let msg = Ignore {
            data: vec![1, 2, 3],
        };
        let parsed = Ignore::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_debug_round_trip() {
        let msg = Debug::new(true, "kex finished");
        let parsed = Debug::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_unimplemented_round_trip() {
        let msg = Unimplemented { sequence: 42 };
        let parsed = Unimplemented::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_service_request_round_trip() {
        let msg = ServiceRequest {
            name: "ssh-userauth".to_string(),
        };
        let parsed = ServiceRequest::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_wrong_type_byte_rejected() {
        let mut bytes = Ignore { data: vec![] }.to_bytes();
        bytes[0] = 99;
        assert!(Ignore::from_bytes(&bytes).is_err());
    }
}
