//! Client error types.

use std::io;

use mqpoll_core::{ProtocolError, ReasonCode};
use thiserror::Error;

/// Client error type.
///
/// Transport faults (`Io`, `ConnectionClosed`) are kept apart from decode
/// failures (`Protocol`) so callers can tell a flaky link from an
/// incompatible peer.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Connection refused: {0}")]
    ConnectionRefused(ReasonCode),

    #[error("Not connected")]
    NotConnected,

    #[error("Keep-alive timeout")]
    KeepAliveTimeout,

    #[error("Disconnected by server: {0}")]
    ServerDisconnect(ReasonCode),

    #[error("Unexpected packet: expected {expected}, got {got}")]
    UnexpectedPacket { expected: &'static str, got: String },

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("No free packet identifiers")]
    PacketIdsExhausted,

    #[error("In-flight limit of {0} messages reached")]
    InflightLimit(u16),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("TLS error: {0}")]
    Tls(String),
}

impl ClientError {
    /// The reason code reported to callbacks for this failure.
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            ClientError::Io(_) | ClientError::NotConnected => ReasonCode::NETWORK_ERROR,
            ClientError::Protocol(ProtocolError::PacketTooLarge { .. }) => ReasonCode::PACKET_TOO_LARGE,
            ClientError::Protocol(_) => ReasonCode::MALFORMED_PACKET,
            ClientError::ConnectionClosed => ReasonCode::UNSPECIFIED_ERROR,
            ClientError::ConnectionRefused(code) | ClientError::ServerDisconnect(code) => *code,
            ClientError::KeepAliveTimeout => ReasonCode::KEEPALIVE_TIMEOUT,
            ClientError::UnexpectedPacket { .. } => ReasonCode::PROTOCOL_ERROR,
            ClientError::InvalidTopic(_) => ReasonCode::TOPIC_NAME_INVALID,
            ClientError::InflightLimit(_) => ReasonCode::RECEIVE_MAXIMUM_EXCEEDED,
            ClientError::PacketIdsExhausted | ClientError::InvalidState(_) | ClientError::Tls(_) => {
                ReasonCode::UNSPECIFIED_ERROR
            }
        }
    }

    /// Whether the error came from the byte stream rather than the protocol.
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Io(_) | ClientError::ConnectionClosed)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        let io = ClientError::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert_eq!(io.reason_code(), ReasonCode::NETWORK_ERROR);
        assert!(io.is_transport());

        let decode = ClientError::from(ProtocolError::MalformedVarint);
        assert_eq!(decode.reason_code(), ReasonCode::MALFORMED_PACKET);
        assert!(!decode.is_transport());

        assert_eq!(
            ClientError::ConnectionRefused(ReasonCode(0x05)).reason_code(),
            ReasonCode(0x05)
        );
        assert_eq!(ClientError::KeepAliveTimeout.reason_code(), ReasonCode::KEEPALIVE_TIMEOUT);
    }
}
