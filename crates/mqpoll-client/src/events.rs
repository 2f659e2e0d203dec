//! Client events and state types.

use mqpoll_core::{Properties, ReasonCode};

use crate::message::Message;

/// Events returned by the client.
///
/// Drained with [`Client::next_event`](crate::Client::next_event), or
/// dispatched to an [`MqttHandler`](crate::MqttHandler) by the callback
/// client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A connection attempt finished. Fired for failures too, with
    /// `reason_code` describing why.
    Connect {
        session_present: bool,
        reason_code: ReasonCode,
        properties: Properties,
    },
    /// The connection ended, locally or by the server.
    Disconnect {
        reason_code: ReasonCode,
        properties: Properties,
    },
    /// An application message was delivered.
    Message(Message),
    /// An outbound publish finished its QoS flow. QoS 0 publishes report
    /// `mid` 0 as soon as they are written.
    Published {
        mid: u16,
        reason_code: ReasonCode,
        properties: Properties,
    },
    /// SUBACK for the SUBSCRIBE with this `mid`.
    Subscribed {
        mid: u16,
        reason_codes: Vec<ReasonCode>,
        properties: Properties,
    },
    /// UNSUBACK for the UNSUBSCRIBE with this `mid`. `reason_codes` is empty
    /// for MQTT 3.1.1.
    Unsubscribed {
        mid: u16,
        reason_codes: Vec<ReasonCode>,
        properties: Properties,
    },
    /// Connection-level diagnostics, mirrored from the `log` output.
    Log { level: log::Level, message: String },
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}
