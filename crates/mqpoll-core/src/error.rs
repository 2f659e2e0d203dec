//! Codec error types.

use thiserror::Error;

/// Errors raised while encoding or decoding MQTT wire data.
///
/// These describe protocol-level incompatibilities, never transport faults.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed variable byte integer")]
    MalformedVarint,

    #[error("Value {0} does not fit in a variable byte integer")]
    VarintTooLarge(u32),

    #[error("String of {len} bytes exceeds the 65535 byte limit")]
    StringTooLong { len: usize },

    #[error("Invalid UTF-8 string")]
    InvalidUtf8,

    #[error("Incomplete packet: need {needed} bytes, have {have}")]
    Incomplete { needed: usize, have: usize },

    #[error("Invalid packet type: {0}")]
    InvalidPacketType(u8),

    #[error("Invalid QoS: {0}")]
    InvalidQoS(u8),

    #[error("Invalid fixed header flags {flags:#04x} for {packet}")]
    InvalidFlags { packet: &'static str, flags: u8 },

    #[error("Property {id:#04x} given a value of the wrong type")]
    PropertyTypeMismatch { id: u8 },

    #[error("Unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(u8),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Packet too large: {size} bytes (max {max})")]
    PacketTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
