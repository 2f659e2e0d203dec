//! Received messages and publish handles.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use mqpoll_core::{Properties, Publish, QoS};

/// An application message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    /// Packet identifier, 0 for QoS 0.
    pub mid: u16,
    pub properties: Properties,
}

impl Message {
    /// The payload as UTF-8, if it is valid.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

impl From<Publish> for Message {
    fn from(publish: Publish) -> Self {
        Self {
            mid: publish.packet_id.unwrap_or(0),
            topic: publish.topic,
            payload: publish.payload,
            qos: publish.qos,
            retain: publish.retain,
            dup: publish.dup,
            properties: publish.properties,
        }
    }
}

/// Delivery state of an outbound publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageState {
    /// Created but not yet written.
    Queued = 0,
    /// Written to the transport.
    Published = 1,
    /// Acknowledged by the broker (PUBACK or PUBCOMP).
    Confirmed = 2,
    /// Dropped: the session it belonged to was discarded or the broker
    /// rejected it.
    Failed = 3,
}

impl MessageState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => MessageState::Queued,
            1 => MessageState::Published,
            2 => MessageState::Confirmed,
            _ => MessageState::Failed,
        }
    }
}

/// Handle returned by [`Client::publish`](crate::Client::publish).
///
/// The state is shared with the client's in-flight table and advances as
/// `loop_once` processes acknowledgements. There is no blocking wait; drive
/// the loop and check the handle.
#[derive(Debug, Clone)]
pub struct MessageInfo {
    mid: u16,
    state: Arc<AtomicU8>,
}

impl MessageInfo {
    pub(crate) fn new(mid: u16) -> Self {
        Self {
            mid,
            state: Arc::new(AtomicU8::new(MessageState::Queued as u8)),
        }
    }

    pub fn mid(&self) -> u16 {
        self.mid
    }

    pub fn state(&self) -> MessageState {
        MessageState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Written to the transport (and possibly already acknowledged).
    pub fn is_published(&self) -> bool {
        matches!(self.state(), MessageState::Published | MessageState::Confirmed)
    }

    pub fn is_confirmed(&self) -> bool {
        self.state() == MessageState::Confirmed
    }

    pub(crate) fn set_state(&self, state: MessageState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_from_publish() {
        let publish = Publish {
            qos: QoS::AtLeastOnce,
            packet_id: Some(12),
            retain: true,
            ..Publish::new("a/b", &b"hello"[..])
        };
        let message = Message::from(publish);
        assert_eq!(message.topic, "a/b");
        assert_eq!(message.payload_str(), Some("hello"));
        assert_eq!(message.mid, 12);
        assert!(message.retain);
    }

    #[test]
    fn test_info_shared_state() {
        let info = MessageInfo::new(3);
        let tracked = info.clone();
        assert_eq!(info.state(), MessageState::Queued);
        assert!(!info.is_published());

        tracked.set_state(MessageState::Published);
        assert!(info.is_published());
        assert!(!info.is_confirmed());

        tracked.set_state(MessageState::Confirmed);
        assert!(info.is_confirmed());
        assert_eq!(info.mid(), 3);
    }
}
