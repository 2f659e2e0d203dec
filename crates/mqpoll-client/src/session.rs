//! Session state tracking for the MQTT client.
//!
//! Client-side session state:
//! - QoS 1 and QoS 2 messages sent but not completely acknowledged
//! - QoS 2 messages received but not yet released by PUBREL
//! - the subscriptions most recently requested
//!
//! Outbound messages are kept in send order so a resumed session re-sends
//! them in the order they were first sent.

use std::collections::VecDeque;

use ahash::AHashMap;
use mqpoll_core::{Ack, Packet, Properties, Publish, QoS, SubscriptionOptions};

use crate::message::{Message, MessageInfo, MessageState};

/// Where an outbound QoS > 0 publish is in its acknowledgement flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundState {
    /// QoS 1: PUBLISH sent, awaiting PUBACK.
    AwaitingPuback,
    /// QoS 2: PUBLISH sent, awaiting PUBREC.
    AwaitingPubrec,
    /// QoS 2: PUBREC received and PUBREL sent, awaiting PUBCOMP.
    AwaitingPubcomp,
}

/// An outbound publish awaiting acknowledgement.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub publish: Publish,
    pub info: MessageInfo,
    pub state: OutboundState,
}

impl Outbound {
    pub fn mid(&self) -> u16 {
        self.info.mid()
    }
}

/// Client session state.
#[derive(Debug, Default)]
pub struct Session {
    outbound: VecDeque<Outbound>,
    inbound_qos2: AHashMap<u16, Message>,
    subscriptions: AHashMap<String, (SubscriptionOptions, Properties)>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a QoS 1/2 publish that has just been written.
    pub fn track_outbound(&mut self, publish: Publish, info: MessageInfo) {
        let state = match publish.qos {
            QoS::ExactlyOnce => OutboundState::AwaitingPubrec,
            _ => OutboundState::AwaitingPuback,
        };
        self.outbound.push_back(Outbound {
            publish,
            info,
            state,
        });
    }

    #[cfg(test)]
    pub fn outbound(&self, mid: u16) -> Option<&Outbound> {
        self.outbound.iter().find(|o| o.mid() == mid)
    }

    pub fn inflight_count(&self) -> usize {
        self.outbound.len()
    }

    /// PUBACK received. Returns the finished entry if `mid` was awaiting one.
    pub fn complete_puback(&mut self, mid: u16) -> Option<Outbound> {
        self.remove_where(mid, |state| state == OutboundState::AwaitingPuback)
    }

    /// PUBREC received. Returns true if a PUBREL should be sent for `mid`.
    ///
    /// A repeated PUBREC for a message already awaiting PUBCOMP also answers
    /// true so the PUBREL is re-sent.
    pub fn record_pubrec(&mut self, mid: u16) -> bool {
        match self.outbound.iter_mut().find(|o| o.info.mid() == mid) {
            Some(entry) if entry.state != OutboundState::AwaitingPuback => {
                entry.state = OutboundState::AwaitingPubcomp;
                true
            }
            _ => false,
        }
    }

    /// PUBCOMP received. Returns the finished entry if `mid` was a QoS 2
    /// publish.
    pub fn complete_pubcomp(&mut self, mid: u16) -> Option<Outbound> {
        self.remove_where(mid, |state| state != OutboundState::AwaitingPuback)
    }

    /// Drop an outbound entry regardless of state (e.g. the broker rejected it).
    pub fn abandon(&mut self, mid: u16) -> Option<Outbound> {
        self.remove_where(mid, |_| true)
    }

    fn remove_where(&mut self, mid: u16, accept: impl Fn(OutboundState) -> bool) -> Option<Outbound> {
        let pos = self
            .outbound
            .iter()
            .position(|o| o.mid() == mid && accept(o.state))?;
        self.outbound.remove(pos)
    }

    /// Hold an inbound QoS 2 message until its PUBREL. A duplicate PUBLISH
    /// for a held `mid` keeps the first copy and returns false.
    pub fn store_inbound(&mut self, message: Message) -> bool {
        if self.inbound_qos2.contains_key(&message.mid) {
            return false;
        }
        self.inbound_qos2.insert(message.mid, message);
        true
    }

    /// PUBREL received: hand back the held message, if any.
    pub fn release_inbound(&mut self, mid: u16) -> Option<Message> {
        self.inbound_qos2.remove(&mid)
    }

    #[cfg(test)]
    pub fn inbound_count(&self) -> usize {
        self.inbound_qos2.len()
    }

    pub fn add_subscription(&mut self, filter: &str, options: SubscriptionOptions, properties: Properties) {
        self.subscriptions
            .insert(filter.to_string(), (options, properties));
    }

    pub fn remove_subscription(&mut self, filter: &str) -> bool {
        self.subscriptions.remove(filter).is_some()
    }

    #[cfg(test)]
    pub fn subscription(&self, filter: &str) -> Option<&(SubscriptionOptions, Properties)> {
        self.subscriptions.get(filter)
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = (&str, &SubscriptionOptions)> {
        self.subscriptions
            .iter()
            .map(|(filter, (options, _))| (filter.as_str(), options))
    }

    /// Packets to re-send when the broker resumes this session, in original
    /// send order: PUBLISH with DUP for anything not yet received by the
    /// broker, PUBREL for QoS 2 messages awaiting PUBCOMP.
    pub fn resend_packets(&self) -> Vec<Packet> {
        self.outbound
            .iter()
            .map(|entry| match entry.state {
                OutboundState::AwaitingPubcomp => Packet::Pubrel(Ack::new(entry.mid())),
                _ => Packet::Publish(Publish {
                    dup: true,
                    ..entry.publish.clone()
                }),
            })
            .collect()
    }

    /// Discard in-flight state for a session the broker did not keep.
    ///
    /// Pending handles are marked failed. Returns the outbound identifiers
    /// that were released. Subscriptions are kept as bookkeeping.
    pub fn discard_inflight(&mut self) -> Vec<u16> {
        let mids = self
            .outbound
            .drain(..)
            .map(|entry| {
                entry.info.set_state(MessageState::Failed);
                entry.mid()
            })
            .collect();
        self.inbound_qos2.clear();
        mids
    }
}
