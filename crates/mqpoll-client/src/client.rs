//! Polling MQTT client.
//!
//! Nothing runs in the background. `connect` blocks until CONNACK (bounded
//! by the configured timeouts); everything else writes straight to the
//! transport and returns. Inbound packets, acknowledgements and keep-alive are
//! handled only inside [`Client::loop_once`], and their outcomes are queued
//! as [`ClientEvent`]s.

use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::Level;
use mqpoll_core::{
    Ack, Connack, Connect, Disconnect, Packet, Properties, PropertyId, Publish, QoS, ReasonCode,
    Subscribe, SubscriptionOptions, Unsubscribe, Will,
};

use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::connection::{read_packet, send_packet, write_frame};
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, ConnectionState};
use crate::message::{Message, MessageInfo, MessageState};
use crate::packet_id::PacketIdAllocator;
use crate::session::{Outbound, Session};
use crate::transport::{Connector, TcpConnector, Transport};

/// Pause after DISCONNECT so the OS can flush it before the socket closes.
const DISCONNECT_LINGER: Duration = Duration::from_millis(100);

/// Limits and features the broker announced in its MQTT 5.0 CONNACK.
/// Defaults apply for MQTT 3.1.1 and for absent properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCapabilities {
    /// Keep-alive the broker imposes, overriding the requested one.
    pub keep_alive: Option<u16>,
    pub maximum_packet_size: Option<u32>,
    pub topic_alias_maximum: u16,
    pub receive_maximum: u16,
    pub assigned_client_id: Option<String>,
    pub maximum_qos: QoS,
    pub retain_available: bool,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            keep_alive: None,
            maximum_packet_size: None,
            topic_alias_maximum: 0,
            receive_maximum: u16::MAX,
            assigned_client_id: None,
            maximum_qos: QoS::ExactlyOnce,
            retain_available: true,
        }
    }
}

impl ServerCapabilities {
    fn from_properties(props: &Properties) -> Self {
        let defaults = Self::default();
        Self {
            keep_alive: props.get_u16(PropertyId::ServerKeepAlive),
            maximum_packet_size: props.get_u32(PropertyId::MaximumPacketSize),
            topic_alias_maximum: props
                .get_u16(PropertyId::TopicAliasMaximum)
                .unwrap_or(defaults.topic_alias_maximum),
            receive_maximum: props
                .get_u16(PropertyId::ReceiveMaximum)
                .unwrap_or(defaults.receive_maximum),
            assigned_client_id: props
                .get_str(PropertyId::AssignedClientIdentifier)
                .map(str::to_string),
            maximum_qos: props
                .get_u8(PropertyId::MaximumQos)
                .and_then(|q| QoS::try_from(q).ok())
                .unwrap_or(defaults.maximum_qos),
            retain_available: props
                .get_u8(PropertyId::RetainAvailable)
                .map_or(defaults.retain_available, |v| v != 0),
        }
    }
}

/// MQTT client driven by explicit [`loop_once`](Client::loop_once) calls.
pub struct Client {
    config: ClientConfig,
    connector: Box<dyn Connector>,
    clock: Box<dyn Clock>,
    transport: Option<Box<dyn Transport>>,
    state: ConnectionState,
    host: Option<(String, u16)>,
    requested_keep_alive: u16,
    /// Keep-alive in effect: requested, or overridden by the broker.
    keep_alive: u16,
    last_recv: Instant,
    ping_pending: bool,
    packet_ids: PacketIdAllocator,
    session: Session,
    server: ServerCapabilities,
    events: VecDeque<ClientEvent>,
    user_disconnected: bool,
}

impl Client {
    /// Create a client that connects over TCP (or TLS when configured).
    pub fn new(config: ClientConfig) -> Self {
        let connector = TcpConnector::new(config.tls.clone());
        Self::with_connector(config, connector)
    }

    /// Create a client that opens its transports through `connector`.
    pub fn with_connector(config: ClientConfig, connector: impl Connector + 'static) -> Self {
        let clock = SystemClock;
        let now = clock.now();
        Self {
            requested_keep_alive: config.keep_alive,
            keep_alive: config.keep_alive,
            config,
            connector: Box::new(connector),
            clock: Box::new(clock),
            transport: None,
            state: ConnectionState::Disconnected,
            host: None,
            last_recv: now,
            ping_pending: false,
            packet_ids: PacketIdAllocator::new(),
            session: Session::new(),
            server: ServerCapabilities::default(),
            events: VecDeque::new(),
            user_disconnected: false,
        }
    }

    /// Replace the time source used for keep-alive and idle tracking.
    pub fn set_clock(&mut self, clock: impl Clock + 'static) {
        self.clock = Box::new(clock);
        self.last_recv = self.clock.now();
    }

    // === Setup ===

    /// Credentials sent with the next CONNECT.
    pub fn username_pw_set(&mut self, username: &str, password: Option<&str>) {
        self.config.username = Some(username.to_string());
        self.config.password = password.map(str::to_string);
    }

    /// Last-will message registered with the next CONNECT.
    pub fn will_set(
        &mut self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
        properties: Properties,
    ) -> Result<()> {
        validate_topic_name(topic)?;
        self.config.will = Some(Will {
            topic: topic.to_string(),
            payload: payload.into(),
            qos,
            retain,
            properties,
        });
        Ok(())
    }

    pub fn will_clear(&mut self) {
        self.config.will = None;
    }

    /// Cap on outbound QoS 1/2 messages awaiting acknowledgement (0 = no cap
    /// beyond the broker's receive maximum).
    pub fn max_inflight_messages_set(&mut self, max: u16) {
        self.config.max_inflight_messages = max;
    }

    // === Connection ===

    /// Connect to `host:port` and wait for CONNACK.
    ///
    /// The TCP connect is attempted `connect_attempts` times. Success and
    /// failure are both reported as a [`ClientEvent::Connect`].
    pub fn connect(&mut self, host: &str, port: u16, keep_alive: u16) -> Result<()> {
        if self.state != ConnectionState::Disconnected {
            return Err(ClientError::InvalidState(
                "Already connected or connecting".to_string(),
            ));
        }

        self.host = Some((host.to_string(), port));
        self.requested_keep_alive = keep_alive;
        self.user_disconnected = false;
        self.state = ConnectionState::Connecting;

        let attempts = self.config.connect_attempts.max(1);
        let mut last_err = None;
        let mut opened = None;
        for attempt in 1..=attempts {
            match self.connector.open(host, port, self.config.connect_timeout) {
                Ok(transport) => {
                    opened = Some(transport);
                    break;
                }
                Err(e @ ClientError::Tls(_)) => {
                    last_err = Some(e);
                    break;
                }
                Err(e) => {
                    self.log(
                        Level::Warn,
                        format!(
                            "Connect attempt {}/{} to {}:{} failed: {}",
                            attempt, attempts, host, port, e
                        ),
                    );
                    last_err = Some(e);
                    if attempt < attempts {
                        std::thread::sleep(self.config.retry_delay);
                    }
                }
            }
        }

        match opened {
            Some(transport) => self.handshake(transport),
            None => {
                let err = last_err.unwrap_or(ClientError::NotConnected);
                let code = err.reason_code();
                Err(self.connect_failed(err, code, Properties::new()))
            }
        }
    }

    /// Run the MQTT handshake over an already open transport.
    pub fn connect_transport(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        if self.state == ConnectionState::Connected {
            return Err(ClientError::InvalidState("Already connected".to_string()));
        }
        self.user_disconnected = false;
        self.state = ConnectionState::Connecting;
        self.handshake(transport)
    }

    /// Reconnect to the last host, disconnecting first if still connected.
    pub fn reconnect(&mut self) -> Result<()> {
        let (host, port) = self
            .host
            .clone()
            .ok_or_else(|| ClientError::InvalidState("No previous connect".to_string()))?;
        if self.state == ConnectionState::Connected {
            self.disconnect(ReasonCode::NORMAL_DISCONNECTION, Properties::new())?;
        }
        self.state = ConnectionState::Disconnected;
        self.connect(&host, port, self.requested_keep_alive)
    }

    fn handshake(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        self.transport = Some(transport);

        let connect = Packet::Connect(self.build_connect());
        if let Err(e) = self.send(&connect) {
            self.close_transport();
            return Err(self.connect_failed(e, ReasonCode::NETWORK_ERROR, Properties::new()));
        }

        let connack = match self.await_connack() {
            Ok(connack) => connack,
            Err(e) => {
                self.close_transport();
                let code = match e {
                    ClientError::UnexpectedPacket { .. } => ReasonCode::PROTOCOL_ERROR,
                    _ => ReasonCode::UNSPECIFIED_ERROR,
                };
                return Err(self.connect_failed(e, code, Properties::new()));
            }
        };

        // 3.1.1 return codes 1-5 sit below 0x80, so compare against SUCCESS.
        if connack.reason_code != ReasonCode::SUCCESS {
            self.close_transport();
            let code = connack.reason_code;
            return Err(self.connect_failed(
                ClientError::ConnectionRefused(code),
                code,
                connack.properties,
            ));
        }

        self.on_connack(connack)
    }

    fn build_connect(&self) -> Connect {
        let v5 = self.config.protocol_version.is_v5();
        Connect {
            protocol_version: self.config.protocol_version,
            clean_start: self.config.clean_start,
            keep_alive: self.requested_keep_alive,
            client_id: self.config.client_id.clone(),
            will: self.config.will.clone(),
            username: self.config.username.clone(),
            password: self.config.password_bytes(),
            properties: if v5 {
                self.config.connect_properties.clone()
            } else {
                Properties::new()
            },
        }
    }

    fn await_connack(&mut self) -> Result<Connack> {
        let version = self.config.protocol_version;
        let socket_timeout = self.config.socket_timeout;
        let deadline = Instant::now() + self.config.connack_timeout;
        let transport = self.transport.as_deref_mut().ok_or(ClientError::NotConnected)?;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !transport.poll_readable(remaining)? {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "No CONNACK received").into());
            }
            match read_packet(transport, version, socket_timeout)? {
                Some(Packet::Connack(connack)) => return Ok(connack),
                Some(other) => {
                    return Err(ClientError::UnexpectedPacket {
                        expected: "CONNACK",
                        got: other.packet_type().name().to_string(),
                    })
                }
                None => continue,
            }
        }
    }

    fn on_connack(&mut self, connack: Connack) -> Result<()> {
        self.state = ConnectionState::Connected;
        self.server = ServerCapabilities::from_properties(&connack.properties);
        self.keep_alive = self.server.keep_alive.unwrap_or(self.requested_keep_alive);
        self.last_recv = self.clock.now();
        self.ping_pending = false;

        if let Some(id) = &self.server.assigned_client_id {
            self.config.client_id = id.clone();
        }

        let (host, port) = self.host.clone().unwrap_or_default();
        self.log(
            Level::Info,
            format!(
                "Connected to {}:{} (session present: {}, keep-alive: {}s)",
                host, port, connack.session_present, self.keep_alive
            ),
        );

        let resend = if connack.session_present {
            self.session.resend_packets()
        } else {
            for mid in self.session.discard_inflight() {
                self.packet_ids.release(mid);
            }
            self.packet_ids.clear();
            Vec::new()
        };

        self.events.push_back(ClientEvent::Connect {
            session_present: connack.session_present,
            reason_code: connack.reason_code,
            properties: connack.properties,
        });

        if !resend.is_empty() {
            self.log(
                Level::Debug,
                format!("Resending {} unacknowledged packets", resend.len()),
            );
        }
        for packet in &resend {
            self.send_or_drop(packet)?;
        }
        Ok(())
    }

    fn connect_failed(
        &mut self,
        err: ClientError,
        reason_code: ReasonCode,
        properties: Properties,
    ) -> ClientError {
        self.state = ConnectionState::Disconnected;
        self.log(Level::Error, format!("Connect failed: {}", err));
        self.events.push_back(ClientEvent::Connect {
            session_present: false,
            reason_code,
            properties,
        });
        err
    }

    /// Send DISCONNECT and close the connection.
    ///
    /// A no-op returning `Ok` when not connected. The disconnect counts as
    /// user-initiated, so `loop_forever` will not reconnect.
    pub fn disconnect(&mut self, reason_code: ReasonCode, properties: Properties) -> Result<()> {
        self.user_disconnected = true;
        if self.state != ConnectionState::Connected || self.transport.is_none() {
            return Ok(());
        }

        let properties = if self.config.protocol_version.is_v5() {
            properties
        } else {
            Properties::new()
        };
        let packet = Packet::Disconnect(Disconnect {
            reason_code,
            properties,
        });
        if let Err(e) = self.send(&packet) {
            log::debug!("DISCONNECT not sent: {}", e);
        }
        std::thread::sleep(DISCONNECT_LINGER);

        self.close_transport();
        self.state = ConnectionState::Disconnected;
        self.log(Level::Info, "Disconnected".to_string());
        self.events.push_back(ClientEvent::Disconnect {
            reason_code,
            properties: Properties::new(),
        });
        Ok(())
    }

    // === Operations ===

    /// Publish a message.
    ///
    /// QoS 0 is reported as published (mid 0) once written. QoS 1 and 2 are
    /// tracked until their acknowledgement arrives through `loop_once`.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
        properties: Properties,
    ) -> Result<MessageInfo> {
        self.ensure_connected()?;
        validate_topic_name(topic)?;

        let mut publish = Publish {
            qos,
            retain,
            properties: self.v5_only(properties),
            ..Publish::new(topic, payload)
        };

        let info = if qos == QoS::AtMostOnce {
            MessageInfo::new(0)
        } else {
            let limit = self.inflight_limit();
            if self.session.inflight_count() >= limit as usize {
                return Err(ClientError::InflightLimit(limit));
            }
            let mid = self
                .packet_ids
                .allocate()
                .ok_or(ClientError::PacketIdsExhausted)?;
            publish.packet_id = Some(mid);
            MessageInfo::new(mid)
        };

        let frame = match self.encode_checked(&Packet::Publish(publish.clone())) {
            Ok(frame) => frame,
            Err(e) => {
                self.packet_ids.release(info.mid());
                return Err(e);
            }
        };
        if let Err(e) = self.transmit(&frame) {
            self.packet_ids.release(info.mid());
            info.set_state(MessageState::Failed);
            return Err(e);
        }

        info.set_state(MessageState::Published);
        log::debug!("PUBLISH {} qos={:?} mid={}", topic, qos, info.mid());
        if qos == QoS::AtMostOnce {
            info.set_state(MessageState::Confirmed);
            self.events.push_back(ClientEvent::Published {
                mid: 0,
                reason_code: ReasonCode::SUCCESS,
                properties: Properties::new(),
            });
        } else {
            self.session.track_outbound(publish, info.clone());
        }
        Ok(info)
    }

    /// Subscribe to one filter.
    pub fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<u16> {
        self.subscribe_with_options(&[(filter, SubscriptionOptions::new(qos))], Properties::new())
    }

    /// Subscribe to several filters with full subscription options.
    /// Returns the SUBSCRIBE packet id; the grant arrives as
    /// [`ClientEvent::Subscribed`].
    pub fn subscribe_with_options(
        &mut self,
        filters: &[(&str, SubscriptionOptions)],
        properties: Properties,
    ) -> Result<u16> {
        self.ensure_connected()?;
        if filters.is_empty() {
            return Err(ClientError::InvalidTopic("No topic filters".to_string()));
        }
        for (filter, _) in filters {
            validate_topic_filter(filter)?;
        }

        let packet_id = self
            .packet_ids
            .allocate()
            .ok_or(ClientError::PacketIdsExhausted)?;
        let properties = self.v5_only(properties);
        let packet = Packet::Subscribe(Subscribe {
            packet_id,
            filters: filters
                .iter()
                .map(|(filter, options)| (filter.to_string(), *options))
                .collect(),
            properties: properties.clone(),
        });
        if let Err(e) = self.send_or_drop(&packet) {
            self.packet_ids.release(packet_id);
            return Err(e);
        }

        for (filter, options) in filters {
            self.session
                .add_subscription(filter, *options, properties.clone());
        }
        log::debug!("SUBSCRIBE mid={} filters={}", packet_id, filters.len());
        Ok(packet_id)
    }

    /// Unsubscribe from filters. Returns the UNSUBSCRIBE packet id.
    pub fn unsubscribe(&mut self, filters: &[&str], properties: Properties) -> Result<u16> {
        self.ensure_connected()?;
        if filters.is_empty() {
            return Err(ClientError::InvalidTopic("No topic filters".to_string()));
        }
        for filter in filters {
            validate_topic_filter(filter)?;
        }

        let packet_id = self
            .packet_ids
            .allocate()
            .ok_or(ClientError::PacketIdsExhausted)?;
        let packet = Packet::Unsubscribe(Unsubscribe {
            packet_id,
            filters: filters.iter().map(|f| f.to_string()).collect(),
            properties: self.v5_only(properties),
        });
        if let Err(e) = self.send_or_drop(&packet) {
            self.packet_ids.release(packet_id);
            return Err(e);
        }

        for filter in filters {
            self.session.remove_subscription(filter);
        }
        log::debug!("UNSUBSCRIBE mid={} filters={}", packet_id, filters.len());
        Ok(packet_id)
    }

    // === Loop ===

    /// Run one iteration: keep-alive, then wait up to `timeout` for one
    /// inbound packet and handle it.
    ///
    /// An error means the client is no longer connected (except
    /// `NotConnected`, returned without side effects when it already
    /// wasn't); the matching [`ClientEvent::Disconnect`] has been queued.
    pub fn loop_once(&mut self, timeout: Duration) -> Result<()> {
        self.ensure_connected()?;

        let now = self.clock.now();
        if self.keep_alive > 0 {
            let idle = now.saturating_duration_since(self.last_recv);
            let interval = Duration::from_secs(u64::from(self.keep_alive));
            if idle >= interval * 3 / 2 {
                self.log(Level::Warn, "Keep-alive timeout, disconnecting".to_string());
                self.connection_lost(ReasonCode::KEEPALIVE_TIMEOUT);
                return Err(ClientError::KeepAliveTimeout);
            }
            if idle >= interval && !self.ping_pending {
                self.send_or_drop(&Packet::Pingreq)?;
                self.ping_pending = true;
                log::trace!("PINGREQ sent");
            }
        }

        let version = self.config.protocol_version;
        let socket_timeout = self.config.socket_timeout;
        let transport = self.transport.as_deref_mut().ok_or(ClientError::NotConnected)?;
        let received = match transport.poll_readable(timeout) {
            Ok(true) => read_packet(transport, version, socket_timeout).map(Some),
            Ok(false) => Ok(None),
            Err(e) => Err(ClientError::Io(e)),
        };

        match received {
            Ok(Some(packet)) => {
                self.last_recv = self.clock.now();
                if let Some(packet) = packet {
                    self.handle_packet(packet)?;
                }
            }
            Ok(None) => {}
            Err(e) => {
                let code = e.reason_code();
                self.log(Level::Error, format!("Connection lost: {}", e));
                self.connection_lost(code);
                return Err(e);
            }
        }

        let idle = self.clock.now().saturating_duration_since(self.last_recv);
        if idle > self.config.idle_reclaim_interval {
            if let Some(transport) = self.transport.as_deref_mut() {
                transport.reclaim();
            }
        }
        Ok(())
    }

    fn handle_packet(&mut self, packet: Packet) -> Result<()> {
        match packet {
            Packet::Publish(publish) => self.handle_publish(publish),
            Packet::Puback(ack) => {
                match self.session.complete_puback(ack.packet_id) {
                    Some(entry) => self.finish_outbound(entry, ack),
                    None => log::debug!("PUBACK for unknown mid {}", ack.packet_id),
                }
            }
            Packet::Pubrec(ack) => {
                let mid = ack.packet_id;
                if !ack.reason_code.is_success() {
                    if let Some(entry) = self.session.abandon(mid) {
                        self.finish_outbound(entry, ack);
                    }
                } else if self.session.record_pubrec(mid) {
                    self.send_ack(Packet::Pubrel(Ack::new(mid)));
                } else {
                    log::debug!("PUBREC for unknown mid {}", mid);
                }
            }
            Packet::Pubrel(ack) => {
                let mid = ack.packet_id;
                match self.session.release_inbound(mid) {
                    Some(message) => self.events.push_back(ClientEvent::Message(message)),
                    None => log::debug!("PUBREL for unknown mid {}", mid),
                }
                self.send_ack(Packet::Pubcomp(Ack::new(mid)));
            }
            Packet::Pubcomp(ack) => {
                match self.session.complete_pubcomp(ack.packet_id) {
                    Some(entry) => self.finish_outbound(entry, ack),
                    None => log::debug!("PUBCOMP for unknown mid {}", ack.packet_id),
                }
            }
            Packet::Suback(suback) => {
                self.packet_ids.release(suback.packet_id);
                self.events.push_back(ClientEvent::Subscribed {
                    mid: suback.packet_id,
                    reason_codes: suback.reason_codes,
                    properties: suback.properties,
                });
            }
            Packet::Unsuback(unsuback) => {
                self.packet_ids.release(unsuback.packet_id);
                self.events.push_back(ClientEvent::Unsubscribed {
                    mid: unsuback.packet_id,
                    reason_codes: unsuback.reason_codes,
                    properties: unsuback.properties,
                });
            }
            Packet::Pingresp => {
                self.ping_pending = false;
            }
            Packet::Disconnect(disconnect) => {
                let code = disconnect.reason_code;
                self.log(Level::Warn, format!("Server disconnected: {}", code));
                self.close_transport();
                self.state = ConnectionState::Disconnected;
                self.ping_pending = false;
                self.events.push_back(ClientEvent::Disconnect {
                    reason_code: code,
                    properties: disconnect.properties,
                });
                return Err(ClientError::ServerDisconnect(code));
            }
            other => {
                log::debug!("Ignoring unexpected {}", other.packet_type().name());
            }
        }
        Ok(())
    }

    fn handle_publish(&mut self, publish: Publish) {
        let message = Message::from(publish);
        let mid = message.mid;
        log::debug!("Received PUBLISH {} qos={:?} mid={}", message.topic, message.qos, mid);
        match message.qos {
            QoS::AtMostOnce => self.events.push_back(ClientEvent::Message(message)),
            QoS::AtLeastOnce => {
                self.events.push_back(ClientEvent::Message(message));
                self.send_ack(Packet::Puback(Ack::new(mid)));
            }
            QoS::ExactlyOnce => {
                if !self.session.store_inbound(message) {
                    log::debug!("Duplicate QoS 2 PUBLISH mid {}", mid);
                }
                self.send_ack(Packet::Pubrec(Ack::new(mid)));
            }
        }
    }

    fn finish_outbound(&mut self, entry: Outbound, ack: Ack) {
        let mid = entry.mid();
        self.packet_ids.release(mid);
        entry.info.set_state(if ack.reason_code.is_success() {
            MessageState::Confirmed
        } else {
            MessageState::Failed
        });
        self.events.push_back(ClientEvent::Published {
            mid,
            reason_code: ack.reason_code,
            properties: ack.properties,
        });
    }

    // === Accessors ===

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn server_capabilities(&self) -> &ServerCapabilities {
        &self.server
    }

    /// Keep-alive in effect for the current connection, in seconds.
    pub fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Number of outbound QoS 1/2 messages awaiting acknowledgement.
    pub fn inflight_count(&self) -> usize {
        self.session.inflight_count()
    }

    /// Filters currently subscribed, as last requested.
    pub fn subscriptions(&self) -> impl Iterator<Item = (&str, &SubscriptionOptions)> {
        self.session.subscriptions()
    }

    /// Get the next event, if any.
    pub fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.pop_front()
    }

    pub(crate) fn user_disconnected(&self) -> bool {
        self.user_disconnected
    }

    // === Internal ===

    fn ensure_connected(&self) -> Result<()> {
        if self.state == ConnectionState::Connected && self.transport.is_some() {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    fn inflight_limit(&self) -> u16 {
        match self.config.max_inflight_messages {
            0 => self.server.receive_maximum,
            max => max.min(self.server.receive_maximum),
        }
    }

    fn v5_only(&self, properties: Properties) -> Properties {
        if self.config.protocol_version.is_v5() {
            properties
        } else {
            Properties::new()
        }
    }

    fn encode_checked(&self, packet: &Packet) -> Result<Vec<u8>> {
        let frame = packet.pack(self.config.protocol_version)?;
        if let Some(max) = self.server.maximum_packet_size {
            if frame.len() > max as usize {
                return Err(mqpoll_core::ProtocolError::PacketTooLarge {
                    size: frame.len(),
                    max: max as usize,
                }
                .into());
            }
        }
        Ok(frame)
    }

    fn send(&mut self, packet: &Packet) -> Result<()> {
        let version = self.config.protocol_version;
        let timeout = self.config.send_timeout;
        let transport = self.transport.as_deref_mut().ok_or(ClientError::NotConnected)?;
        send_packet(transport, packet, version, timeout)
    }

    /// Send, tearing the connection down if the transport failed.
    fn send_or_drop(&mut self, packet: &Packet) -> Result<()> {
        let frame = self.encode_checked(packet)?;
        self.transmit(&frame)
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<()> {
        let timeout = self.config.send_timeout;
        let transport = self.transport.as_deref_mut().ok_or(ClientError::NotConnected)?;
        match write_frame(transport, frame, timeout) {
            Err(e) if e.is_transport() => {
                self.log(Level::Error, format!("Send failed: {}", e));
                self.connection_lost(e.reason_code());
                Err(e)
            }
            other => other,
        }
    }

    /// Acknowledgements are best effort; a failed write surfaces on the next
    /// read.
    fn send_ack(&mut self, packet: Packet) {
        if let Err(e) = self.send(&packet) {
            self.log(
                Level::Warn,
                format!("Failed to send {}: {}", packet.packet_type().name(), e),
            );
        }
    }

    fn connection_lost(&mut self, reason_code: ReasonCode) {
        self.close_transport();
        self.state = ConnectionState::Disconnected;
        self.ping_pending = false;
        self.events.push_back(ClientEvent::Disconnect {
            reason_code,
            properties: Properties::new(),
        });
    }

    fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
    }

    fn log(&mut self, level: Level, message: String) {
        log::log!(level, "{}", message);
        self.events.push_back(ClientEvent::Log { level, message });
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if self.is_connected() {
            let _ = self.send(&Packet::Disconnect(Disconnect::new(
                ReasonCode::NORMAL_DISCONNECTION,
            )));
        }
        self.close_transport();
    }
}

/// Topic names for PUBLISH and wills: non-empty, no wildcards.
fn validate_topic_name(topic: &str) -> Result<()> {
    if topic.is_empty() || topic.contains(['+', '#']) || topic.contains('\0') {
        return Err(ClientError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

/// Topic filters: `+` fills a whole level, `#` a whole final level.
fn validate_topic_filter(filter: &str) -> Result<()> {
    let invalid = || ClientError::InvalidTopic(filter.to_string());
    if filter.is_empty() || filter.contains('\0') {
        return Err(invalid());
    }
    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        let last = levels.peek().is_none();
        match level {
            "+" => {}
            "#" if last => {}
            _ if level.contains(['+', '#']) => return Err(invalid()),
            _ => {}
        }
    }
    Ok(())
}
