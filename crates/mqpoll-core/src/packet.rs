//! MQTT control packets for MQTT 3.1.1 and MQTT 5.0.
//!
//! Every packet both encodes and decodes. Encoding writes the variable
//! header and payload into a scratch buffer first, so the remaining length in
//! the fixed header is always computed from the bytes actually produced.

use bytes::Bytes;

use crate::codec::{encode_binary, encode_utf8_string, Decoder};
use crate::error::{ProtocolError, Result};
use crate::property::Properties;
use crate::reason::ReasonCode;
use crate::varint;

/// Protocol name carried in CONNECT.
pub const PROTOCOL_NAME: &str = "MQTT";

/// Protocol level negotiated in CONNECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum ProtocolVersion {
    #[default]
    V311 = 4,
    V5 = 5,
}

impl ProtocolVersion {
    pub fn is_v5(self) -> bool {
        self == ProtocolVersion::V5
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            4 => Ok(ProtocolVersion::V311),
            5 => Ok(ProtocolVersion::V5),
            _ => Err(ProtocolError::UnsupportedProtocolVersion(value)),
        }
    }
}

/// MQTT Control Packet Types (4 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    Connack = 2,
    Publish = 3,
    Puback = 4,
    Pubrec = 5,
    Pubrel = 6,
    Pubcomp = 7,
    Subscribe = 8,
    Suback = 9,
    Unsubscribe = 10,
    Unsuback = 11,
    Pingreq = 12,
    Pingresp = 13,
    Disconnect = 14,
    Auth = 15,
}

impl PacketType {
    /// Upper-case control packet name, e.g. `"CONNACK"`.
    pub fn name(self) -> &'static str {
        match self {
            PacketType::Connect => "CONNECT",
            PacketType::Connack => "CONNACK",
            PacketType::Publish => "PUBLISH",
            PacketType::Puback => "PUBACK",
            PacketType::Pubrec => "PUBREC",
            PacketType::Pubrel => "PUBREL",
            PacketType::Pubcomp => "PUBCOMP",
            PacketType::Subscribe => "SUBSCRIBE",
            PacketType::Suback => "SUBACK",
            PacketType::Unsubscribe => "UNSUBSCRIBE",
            PacketType::Unsuback => "UNSUBACK",
            PacketType::Pingreq => "PINGREQ",
            PacketType::Pingresp => "PINGRESP",
            PacketType::Disconnect => "DISCONNECT",
            PacketType::Auth => "AUTH",
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(PacketType::Connect),
            2 => Ok(PacketType::Connack),
            3 => Ok(PacketType::Publish),
            4 => Ok(PacketType::Puback),
            5 => Ok(PacketType::Pubrec),
            6 => Ok(PacketType::Pubrel),
            7 => Ok(PacketType::Pubcomp),
            8 => Ok(PacketType::Subscribe),
            9 => Ok(PacketType::Suback),
            10 => Ok(PacketType::Unsubscribe),
            11 => Ok(PacketType::Unsuback),
            12 => Ok(PacketType::Pingreq),
            13 => Ok(PacketType::Pingresp),
            14 => Ok(PacketType::Disconnect),
            15 => Ok(PacketType::Auth),
            _ => Err(ProtocolError::InvalidPacketType(value)),
        }
    }
}

/// Quality of Service levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
#[allow(clippy::enum_variant_names)] // MQTT names
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(ProtocolError::InvalidQoS(value)),
        }
    }
}

/// Per-filter SUBSCRIBE options.
///
/// MQTT 3.1.1 only carries the QoS bits; the remaining fields are written
/// for MQTT 5.0 only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscriptionOptions {
    pub qos: QoS,
    pub no_local: bool,
    pub retain_as_published: bool,
    /// 0 = send retained on subscribe, 1 = only for new subscriptions, 2 = never.
    pub retain_handling: u8,
}

impl SubscriptionOptions {
    pub fn new(qos: QoS) -> Self {
        Self {
            qos,
            ..Default::default()
        }
    }

    pub fn to_byte(&self, version: ProtocolVersion) -> u8 {
        let mut byte = self.qos as u8;
        if version.is_v5() {
            if self.no_local {
                byte |= 0x04;
            }
            if self.retain_as_published {
                byte |= 0x08;
            }
            byte |= (self.retain_handling & 0x03) << 4;
        }
        byte
    }

    pub fn from_byte(byte: u8, version: ProtocolVersion) -> Result<Self> {
        let qos = QoS::try_from(byte & 0x03)?;
        if !version.is_v5() {
            return Ok(Self::new(qos));
        }
        let retain_handling = (byte >> 4) & 0x03;
        if byte & 0xC0 != 0 || retain_handling == 3 {
            return Err(ProtocolError::MalformedPacket(format!(
                "Invalid subscription options: {:#04x}",
                byte
            )));
        }
        Ok(Self {
            qos,
            no_local: (byte & 0x04) != 0,
            retain_as_published: (byte & 0x08) != 0,
            retain_handling,
        })
    }
}

/// Last Will and Testament carried in CONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    /// Will properties (MQTT 5.0 only).
    pub properties: Properties,
}

/// CONNECT packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub protocol_version: ProtocolVersion,
    pub clean_start: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<Will>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
    pub properties: Properties,
}

impl Connect {
    fn write_body(&self, buf: &mut Vec<u8>) -> Result<()> {
        let v5 = self.protocol_version.is_v5();

        encode_utf8_string(PROTOCOL_NAME, buf)?;
        buf.push(self.protocol_version as u8);

        let mut flags = 0u8;
        if self.clean_start {
            flags |= 0x02;
        }
        if let Some(will) = &self.will {
            flags |= 0x04 | ((will.qos as u8) << 3);
            if will.retain {
                flags |= 0x20;
            }
        }
        if self.password.is_some() {
            flags |= 0x40;
        }
        if self.username.is_some() {
            flags |= 0x80;
        }
        buf.push(flags);
        buf.extend_from_slice(&self.keep_alive.to_be_bytes());

        if v5 {
            self.properties.encode(buf)?;
        }

        encode_utf8_string(&self.client_id, buf)?;
        if let Some(will) = &self.will {
            if v5 {
                will.properties.encode(buf)?;
            }
            encode_utf8_string(&will.topic, buf)?;
            encode_binary(&will.payload, buf)?;
        }
        if let Some(username) = &self.username {
            encode_utf8_string(username, buf)?;
        }
        if let Some(password) = &self.password {
            encode_binary(password, buf)?;
        }
        Ok(())
    }

    /// Decode a CONNECT body. The protocol level is taken from the packet
    /// itself, not from the caller.
    pub fn unpack(_flags: u8, body: &[u8], _version: ProtocolVersion) -> Result<Self> {
        let mut dec = Decoder::new(body);

        let name = dec.read_utf8()?;
        if name != PROTOCOL_NAME {
            return Err(ProtocolError::MalformedPacket(format!(
                "Invalid protocol name: {}",
                name
            )));
        }
        let protocol_version = ProtocolVersion::try_from(dec.read_u8()?)?;
        let v5 = protocol_version.is_v5();

        let flags = dec.read_u8()?;
        if (flags & 0x01) != 0 {
            return Err(ProtocolError::MalformedPacket(
                "CONNECT reserved flag must be 0".into(),
            ));
        }
        let clean_start = (flags & 0x02) != 0;
        let will_flag = (flags & 0x04) != 0;
        let will_qos = QoS::try_from((flags >> 3) & 0x03)?;
        let will_retain = (flags & 0x20) != 0;
        let password_flag = (flags & 0x40) != 0;
        let username_flag = (flags & 0x80) != 0;

        let keep_alive = dec.read_u16()?;
        let properties = if v5 {
            Properties::decode(&mut dec)?
        } else {
            Properties::new()
        };

        let client_id = dec.read_utf8()?;
        let will = if will_flag {
            let properties = if v5 {
                Properties::decode(&mut dec)?
            } else {
                Properties::new()
            };
            let topic = dec.read_utf8()?;
            let payload = dec.read_binary()?;
            Some(Will {
                topic,
                payload,
                qos: will_qos,
                retain: will_retain,
                properties,
            })
        } else {
            None
        };
        let username = if username_flag {
            Some(dec.read_utf8()?)
        } else {
            None
        };
        let password = if password_flag {
            Some(dec.read_binary()?)
        } else {
            None
        };

        Ok(Self {
            protocol_version,
            clean_start,
            keep_alive,
            client_id,
            will,
            username,
            password,
            properties,
        })
    }
}

/// CONNACK packet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Connack {
    pub session_present: bool,
    /// MQTT 5.0 reason code, or the MQTT 3.1.1 return code verbatim.
    pub reason_code: ReasonCode,
    pub properties: Properties,
}

impl Connack {
    fn write_body(&self, version: ProtocolVersion, buf: &mut Vec<u8>) -> Result<()> {
        buf.push(self.session_present as u8);
        buf.push(self.reason_code.0);
        if version.is_v5() {
            self.properties.encode(buf)?;
        }
        Ok(())
    }

    pub fn unpack(_flags: u8, body: &[u8], version: ProtocolVersion) -> Result<Self> {
        let mut dec = Decoder::new(body);
        let ack_flags = dec.read_u8()?;
        let reason_code = ReasonCode(dec.read_u8()?);
        let properties = if version.is_v5() && !dec.is_empty() {
            Properties::decode(&mut dec)?
        } else {
            Properties::new()
        };
        Ok(Self {
            session_present: (ack_flags & 0x01) != 0,
            reason_code,
            properties,
        })
    }
}

/// PUBLISH packet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    /// Present only for QoS 1 and 2.
    pub packet_id: Option<u16>,
    pub payload: Bytes,
    pub properties: Properties,
}

impl Publish {
    /// A QoS 0 message with no flags set.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            ..Default::default()
        }
    }

    pub fn flags(&self) -> u8 {
        ((self.dup as u8) << 3) | ((self.qos as u8) << 1) | (self.retain as u8)
    }

    fn write_body(&self, version: ProtocolVersion, buf: &mut Vec<u8>) -> Result<()> {
        encode_utf8_string(&self.topic, buf)?;
        if self.qos != QoS::AtMostOnce {
            let packet_id = self.packet_id.ok_or_else(|| {
                ProtocolError::MalformedPacket("QoS > 0 PUBLISH needs a packet id".into())
            })?;
            buf.extend_from_slice(&packet_id.to_be_bytes());
        }
        if version.is_v5() {
            self.properties.encode(buf)?;
        }
        buf.extend_from_slice(&self.payload);
        Ok(())
    }

    pub fn unpack(flags: u8, body: &[u8], version: ProtocolVersion) -> Result<Self> {
        let qos = QoS::try_from((flags >> 1) & 0x03)?;
        let mut dec = Decoder::new(body);
        let topic = dec.read_utf8()?;
        let packet_id = if qos != QoS::AtMostOnce {
            Some(dec.read_u16()?)
        } else {
            None
        };
        let properties = if version.is_v5() {
            Properties::decode(&mut dec)?
        } else {
            Properties::new()
        };
        let payload = Bytes::copy_from_slice(dec.read_rest());
        Ok(Self {
            dup: (flags & 0x08) != 0,
            qos,
            retain: (flags & 0x01) != 0,
            topic,
            packet_id,
            payload,
            properties,
        })
    }
}

/// PUBACK, PUBREC, PUBREL and PUBCOMP share this layout.
///
/// MQTT 5.0 lets the reason code and properties be omitted when the code is
/// SUCCESS and there are no properties; both directions honor that.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ack {
    pub packet_id: u16,
    pub reason_code: ReasonCode,
    pub properties: Properties,
}

impl Ack {
    pub fn new(packet_id: u16) -> Self {
        Self {
            packet_id,
            ..Default::default()
        }
    }

    fn write_body(&self, version: ProtocolVersion, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&self.packet_id.to_be_bytes());
        if version.is_v5() && (self.reason_code != ReasonCode::SUCCESS || !self.properties.is_empty()) {
            buf.push(self.reason_code.0);
            if !self.properties.is_empty() {
                self.properties.encode(buf)?;
            }
        }
        Ok(())
    }

    pub fn unpack(_flags: u8, body: &[u8], version: ProtocolVersion) -> Result<Self> {
        let mut dec = Decoder::new(body);
        let packet_id = dec.read_u16()?;
        let mut ack = Ack::new(packet_id);
        if version.is_v5() && !dec.is_empty() {
            ack.reason_code = ReasonCode(dec.read_u8()?);
            if !dec.is_empty() {
                ack.properties = Properties::decode(&mut dec)?;
            }
        }
        Ok(ack)
    }
}

/// SUBSCRIBE packet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Subscribe {
    pub packet_id: u16,
    pub filters: Vec<(String, SubscriptionOptions)>,
    pub properties: Properties,
}

impl Subscribe {
    fn write_body(&self, version: ProtocolVersion, buf: &mut Vec<u8>) -> Result<()> {
        if self.filters.is_empty() {
            return Err(ProtocolError::MalformedPacket(
                "SUBSCRIBE needs at least one topic filter".into(),
            ));
        }
        buf.extend_from_slice(&self.packet_id.to_be_bytes());
        if version.is_v5() {
            self.properties.encode(buf)?;
        }
        for (filter, options) in &self.filters {
            encode_utf8_string(filter, buf)?;
            buf.push(options.to_byte(version));
        }
        Ok(())
    }

    pub fn unpack(_flags: u8, body: &[u8], version: ProtocolVersion) -> Result<Self> {
        let mut dec = Decoder::new(body);
        let packet_id = dec.read_u16()?;
        let properties = if version.is_v5() {
            Properties::decode(&mut dec)?
        } else {
            Properties::new()
        };
        let mut filters = Vec::new();
        while !dec.is_empty() {
            let filter = dec.read_utf8()?;
            let options = SubscriptionOptions::from_byte(dec.read_u8()?, version)?;
            filters.push((filter, options));
        }
        if filters.is_empty() {
            return Err(ProtocolError::MalformedPacket(
                "SUBSCRIBE with no topic filters".into(),
            ));
        }
        Ok(Self {
            packet_id,
            filters,
            properties,
        })
    }
}

/// SUBACK packet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Suback {
    pub packet_id: u16,
    /// One code per requested filter, in request order.
    pub reason_codes: Vec<ReasonCode>,
    pub properties: Properties,
}

impl Suback {
    fn write_body(&self, version: ProtocolVersion, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&self.packet_id.to_be_bytes());
        if version.is_v5() {
            self.properties.encode(buf)?;
        }
        buf.extend(self.reason_codes.iter().map(|code| code.0));
        Ok(())
    }

    pub fn unpack(_flags: u8, body: &[u8], version: ProtocolVersion) -> Result<Self> {
        let mut dec = Decoder::new(body);
        let packet_id = dec.read_u16()?;
        let properties = if version.is_v5() {
            Properties::decode(&mut dec)?
        } else {
            Properties::new()
        };
        let reason_codes = dec.read_rest().iter().map(|&b| ReasonCode(b)).collect();
        Ok(Self {
            packet_id,
            reason_codes,
            properties,
        })
    }
}

/// UNSUBSCRIBE packet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Unsubscribe {
    pub packet_id: u16,
    pub filters: Vec<String>,
    pub properties: Properties,
}

impl Unsubscribe {
    fn write_body(&self, version: ProtocolVersion, buf: &mut Vec<u8>) -> Result<()> {
        if self.filters.is_empty() {
            return Err(ProtocolError::MalformedPacket(
                "UNSUBSCRIBE needs at least one topic filter".into(),
            ));
        }
        buf.extend_from_slice(&self.packet_id.to_be_bytes());
        if version.is_v5() {
            self.properties.encode(buf)?;
        }
        for filter in &self.filters {
            encode_utf8_string(filter, buf)?;
        }
        Ok(())
    }

    pub fn unpack(_flags: u8, body: &[u8], version: ProtocolVersion) -> Result<Self> {
        let mut dec = Decoder::new(body);
        let packet_id = dec.read_u16()?;
        let properties = if version.is_v5() {
            Properties::decode(&mut dec)?
        } else {
            Properties::new()
        };
        let mut filters = Vec::new();
        while !dec.is_empty() {
            filters.push(dec.read_utf8()?);
        }
        if filters.is_empty() {
            return Err(ProtocolError::MalformedPacket(
                "UNSUBSCRIBE with no topic filters".into(),
            ));
        }
        Ok(Self {
            packet_id,
            filters,
            properties,
        })
    }
}

/// UNSUBACK packet. MQTT 3.1.1 carries only the packet id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Unsuback {
    pub packet_id: u16,
    pub reason_codes: Vec<ReasonCode>,
    pub properties: Properties,
}

impl Unsuback {
    fn write_body(&self, version: ProtocolVersion, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&self.packet_id.to_be_bytes());
        if version.is_v5() {
            self.properties.encode(buf)?;
            buf.extend(self.reason_codes.iter().map(|code| code.0));
        }
        Ok(())
    }

    pub fn unpack(_flags: u8, body: &[u8], version: ProtocolVersion) -> Result<Self> {
        let mut dec = Decoder::new(body);
        let packet_id = dec.read_u16()?;
        let mut unsuback = Unsuback {
            packet_id,
            ..Default::default()
        };
        if version.is_v5() {
            unsuback.properties = Properties::decode(&mut dec)?;
            unsuback.reason_codes = dec.read_rest().iter().map(|&b| ReasonCode(b)).collect();
        }
        Ok(unsuback)
    }
}

/// DISCONNECT packet. Both fields are MQTT 5.0 only; an empty body means
/// normal disconnection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Disconnect {
    pub reason_code: ReasonCode,
    pub properties: Properties,
}

impl Disconnect {
    pub fn new(reason_code: ReasonCode) -> Self {
        Self {
            reason_code,
            properties: Properties::new(),
        }
    }

    fn write_body(&self, version: ProtocolVersion, buf: &mut Vec<u8>) -> Result<()> {
        if version.is_v5()
            && (self.reason_code != ReasonCode::NORMAL_DISCONNECTION || !self.properties.is_empty())
        {
            buf.push(self.reason_code.0);
            if !self.properties.is_empty() {
                self.properties.encode(buf)?;
            }
        }
        Ok(())
    }

    pub fn unpack(_flags: u8, body: &[u8], version: ProtocolVersion) -> Result<Self> {
        let mut dec = Decoder::new(body);
        let mut disconnect = Disconnect::default();
        if version.is_v5() && !dec.is_empty() {
            disconnect.reason_code = ReasonCode(dec.read_u8()?);
            if !dec.is_empty() {
                disconnect.properties = Properties::decode(&mut dec)?;
            }
        }
        Ok(disconnect)
    }
}

/// MQTT Packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    Connack(Connack),
    Publish(Publish),
    Puback(Ack),
    Pubrec(Ack),
    Pubrel(Ack),
    Pubcomp(Ack),
    Subscribe(Subscribe),
    Suback(Suback),
    Unsubscribe(Unsubscribe),
    Unsuback(Unsuback),
    Pingreq,
    Pingresp,
    Disconnect(Disconnect),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::Connack(_) => PacketType::Connack,
            Packet::Publish(_) => PacketType::Publish,
            Packet::Puback(_) => PacketType::Puback,
            Packet::Pubrec(_) => PacketType::Pubrec,
            Packet::Pubrel(_) => PacketType::Pubrel,
            Packet::Pubcomp(_) => PacketType::Pubcomp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::Suback(_) => PacketType::Suback,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::Unsuback(_) => PacketType::Unsuback,
            Packet::Pingreq => PacketType::Pingreq,
            Packet::Pingresp => PacketType::Pingresp,
            Packet::Disconnect(_) => PacketType::Disconnect,
        }
    }

    /// Low nibble of the fixed header byte.
    pub fn flags(&self) -> u8 {
        match self {
            Packet::Publish(publish) => publish.flags(),
            Packet::Pubrel(_) | Packet::Subscribe(_) | Packet::Unsubscribe(_) => 0x02,
            _ => 0x00,
        }
    }

    /// Append the complete wire form (fixed header included) to `buf`.
    pub fn encode(&self, version: ProtocolVersion, buf: &mut Vec<u8>) -> Result<()> {
        let mut body = Vec::new();
        match self {
            Packet::Connect(p) => p.write_body(&mut body)?,
            Packet::Connack(p) => p.write_body(version, &mut body)?,
            Packet::Publish(p) => p.write_body(version, &mut body)?,
            Packet::Puback(p) | Packet::Pubrec(p) | Packet::Pubrel(p) | Packet::Pubcomp(p) => {
                p.write_body(version, &mut body)?
            }
            Packet::Subscribe(p) => p.write_body(version, &mut body)?,
            Packet::Suback(p) => p.write_body(version, &mut body)?,
            Packet::Unsubscribe(p) => p.write_body(version, &mut body)?,
            Packet::Unsuback(p) => p.write_body(version, &mut body)?,
            Packet::Pingreq | Packet::Pingresp => {}
            Packet::Disconnect(p) => p.write_body(version, &mut body)?,
        }

        if body.len() > varint::MAX_VALUE as usize {
            return Err(ProtocolError::PacketTooLarge {
                size: body.len(),
                max: varint::MAX_VALUE as usize,
            });
        }
        buf.push(((self.packet_type() as u8) << 4) | self.flags());
        varint::encode(body.len() as u32, buf)?;
        buf.extend_from_slice(&body);
        Ok(())
    }

    /// Serialize to a standalone buffer.
    pub fn pack(&self, version: ProtocolVersion) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode(version, &mut buf)?;
        Ok(buf)
    }
}

impl From<Publish> for Packet {
    fn from(publish: Publish) -> Self {
        Packet::Publish(publish)
    }
}

/// Decode one packet body given its fixed header byte.
///
/// Returns `Ok(None)` for packet types this codec does not handle (type 0
/// and AUTH); callers drop those silently.
pub fn decode_packet(header: u8, body: &[u8], version: ProtocolVersion) -> Result<Option<Packet>> {
    let flags = header & 0x0F;
    let Ok(packet_type) = PacketType::try_from(header >> 4) else {
        return Ok(None);
    };

    // SUBSCRIBE, UNSUBSCRIBE and PUBREL fixed header flags MUST be 0010.
    if matches!(
        packet_type,
        PacketType::Subscribe | PacketType::Unsubscribe | PacketType::Pubrel
    ) && flags != 0x02
    {
        return Err(ProtocolError::InvalidFlags {
            packet: packet_type.name(),
            flags,
        });
    }

    let packet = match packet_type {
        PacketType::Connect => Packet::Connect(Connect::unpack(flags, body, version)?),
        PacketType::Connack => Packet::Connack(Connack::unpack(flags, body, version)?),
        PacketType::Publish => Packet::Publish(Publish::unpack(flags, body, version)?),
        PacketType::Puback => Packet::Puback(Ack::unpack(flags, body, version)?),
        PacketType::Pubrec => Packet::Pubrec(Ack::unpack(flags, body, version)?),
        PacketType::Pubrel => Packet::Pubrel(Ack::unpack(flags, body, version)?),
        PacketType::Pubcomp => Packet::Pubcomp(Ack::unpack(flags, body, version)?),
        PacketType::Subscribe => Packet::Subscribe(Subscribe::unpack(flags, body, version)?),
        PacketType::Suback => Packet::Suback(Suback::unpack(flags, body, version)?),
        PacketType::Unsubscribe => Packet::Unsubscribe(Unsubscribe::unpack(flags, body, version)?),
        PacketType::Unsuback => Packet::Unsuback(Unsuback::unpack(flags, body, version)?),
        PacketType::Pingreq => Packet::Pingreq,
        PacketType::Pingresp => Packet::Pingresp,
        PacketType::Disconnect => Packet::Disconnect(Disconnect::unpack(flags, body, version)?),
        PacketType::Auth => {
            log::debug!("Ignoring AUTH packet ({} bytes)", body.len());
            return Ok(None);
        }
    };
    Ok(Some(packet))
}

/// Split one complete frame off the front of `buf`.
///
/// Returns `Ok(Some((packet, bytes_consumed)))`, or `Ok(None)` if `buf` does
/// not yet hold a whole frame. A frame of a type [`decode_packet`] ignores is
/// reported as [`ProtocolError::InvalidPacketType`].
pub fn decode_frame(buf: &[u8], version: ProtocolVersion) -> Result<Option<(Packet, usize)>> {
    let Some(&header) = buf.first() else {
        return Ok(None);
    };
    let Some((remaining, len_bytes)) = varint::decode_partial(&buf[1..])? else {
        return Ok(None);
    };
    let start = 1 + len_bytes;
    let total = start + remaining as usize;
    if buf.len() < total {
        return Ok(None);
    }
    match decode_packet(header, &buf[start..total], version)? {
        Some(packet) => Ok(Some((packet, total))),
        None => Err(ProtocolError::InvalidPacketType(header >> 4)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::PropertyId;

    const V311: ProtocolVersion = ProtocolVersion::V311;
    const V5: ProtocolVersion = ProtocolVersion::V5;

    fn roundtrip(packet: &Packet, version: ProtocolVersion) -> Packet {
        let bytes = packet.pack(version).unwrap();
        let (decoded, consumed) = decode_frame(&bytes, version).unwrap().unwrap();
        assert_eq!(consumed, bytes.len());
        decoded
    }

    fn qos1_publish() -> Publish {
        Publish {
            qos: QoS::AtLeastOnce,
            packet_id: Some(7),
            ..Publish::new("a/b", &b"x"[..])
        }
    }

    #[test]
    fn test_publish_qos1_roundtrip() {
        let Packet::Publish(p) = roundtrip(&qos1_publish().into(), V311) else {
            panic!("expected PUBLISH");
        };
        assert_eq!(p.topic, "a/b");
        assert_eq!(&p.payload[..], b"x");
        assert_eq!(p.qos, QoS::AtLeastOnce);
        assert_eq!(p.packet_id, Some(7));
        assert!(!p.dup);
        assert!(!p.retain);
    }

    #[test]
    fn test_publish_qos0_has_no_packet_id() {
        let qos1 = Packet::from(qos1_publish()).pack(V311).unwrap();
        let qos0 = Packet::from(Publish::new("a/b", &b"x"[..])).pack(V311).unwrap();
        assert_eq!(qos1.len() - qos0.len(), 2);
        assert_eq!(qos0, [0x30, 0x06, 0x00, 0x03, b'a', b'/', b'b', b'x']);
    }

    #[test]
    fn test_publish_flags() {
        let publish = Publish {
            dup: true,
            qos: QoS::ExactlyOnce,
            retain: true,
            packet_id: Some(1),
            ..Publish::new("t", Bytes::new())
        };
        assert_eq!(publish.flags(), 0x0D);
        assert_eq!(Packet::from(publish.clone()), roundtrip(&publish.into(), V311));
    }

    #[test]
    fn test_publish_v5_properties() {
        let mut publish = qos1_publish();
        publish
            .properties
            .set(PropertyId::MessageExpiryInterval, 30u32)
            .unwrap();
        publish.properties.add_user_property("origin", "test");
        let packet = Packet::from(publish);
        assert_eq!(roundtrip(&packet, V5), packet);
    }

    #[test]
    fn test_publish_invalid_qos() {
        let body = [0x00, 0x01, b't', 0x00, 0x01];
        assert_eq!(
            decode_packet(0x36, &body, V311),
            Err(ProtocolError::InvalidQoS(3))
        );
    }

    #[test]
    fn test_publish_qos1_without_packet_id() {
        let publish = Publish {
            qos: QoS::AtLeastOnce,
            ..Publish::new("t", Bytes::new())
        };
        assert!(Packet::from(publish).pack(V311).is_err());
    }

    #[test]
    fn test_connect_v311_bytes() {
        let connect = Connect {
            protocol_version: V311,
            clean_start: true,
            keep_alive: 60,
            client_id: "c".into(),
            will: None,
            username: None,
            password: None,
            properties: Properties::new(),
        };
        let bytes = Packet::Connect(connect).pack(V311).unwrap();
        assert_eq!(
            bytes,
            [0x10, 0x0D, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x3C, 0x00, 0x01, b'c']
        );
    }

    #[test]
    fn test_connect_v5_full_roundtrip() {
        let mut will_props = Properties::new();
        will_props.set(PropertyId::WillDelayInterval, 5u32).unwrap();
        let connect = Connect {
            protocol_version: V5,
            clean_start: false,
            keep_alive: 30,
            client_id: "dev-1".into(),
            will: Some(Will {
                topic: "dev/1/status".into(),
                payload: Bytes::from_static(b"offline"),
                qos: QoS::AtLeastOnce,
                retain: true,
                properties: will_props,
            }),
            username: Some("user".into()),
            password: Some(Bytes::from_static(b"secret")),
            properties: Properties::new()
                .with(PropertyId::SessionExpiryInterval, 120u32)
                .unwrap(),
        };
        let packet = Packet::Connect(connect);
        let bytes = packet.pack(V5).unwrap();
        // will flag, will QoS 1, will retain, password, username
        assert_eq!(bytes[9], 0x04 | 0x08 | 0x20 | 0x40 | 0x80);
        assert_eq!(roundtrip(&packet, V5), packet);
    }

    #[test]
    fn test_connack_v311() {
        let packet = decode_packet(0x20, &[0x01, 0x00], V311).unwrap().unwrap();
        let Packet::Connack(connack) = packet else {
            panic!("expected CONNACK");
        };
        assert!(connack.session_present);
        assert_eq!(connack.reason_code, ReasonCode::SUCCESS);
    }

    #[test]
    fn test_connack_v5_properties() {
        let connack = Connack {
            session_present: false,
            reason_code: ReasonCode::SUCCESS,
            properties: Properties::new()
                .with(PropertyId::ServerKeepAlive, 20u16)
                .unwrap()
                .with(PropertyId::AssignedClientIdentifier, "auto-1")
                .unwrap(),
        };
        let packet = Packet::Connack(connack);
        assert_eq!(roundtrip(&packet, V5), packet);
    }

    #[test]
    fn test_connack_v5_short_body() {
        let packet = decode_packet(0x20, &[0x00, 0x87], V5).unwrap().unwrap();
        let Packet::Connack(connack) = packet else {
            panic!("expected CONNACK");
        };
        assert_eq!(connack.reason_code, ReasonCode::NOT_AUTHORIZED);
        assert!(connack.properties.is_empty());
    }

    #[test]
    fn test_ack_minimal_v5() {
        let bytes = Packet::Puback(Ack::new(0x1234)).pack(V5).unwrap();
        assert_eq!(bytes, [0x40, 0x02, 0x12, 0x34]);

        let Some(Packet::Pubcomp(ack)) = decode_packet(0x70, &[0x00, 0x09], V5).unwrap() else {
            panic!("expected PUBCOMP");
        };
        assert_eq!(ack.packet_id, 9);
        assert_eq!(ack.reason_code, ReasonCode::SUCCESS);
    }

    #[test]
    fn test_ack_v5_reason_code() {
        let ack = Ack {
            packet_id: 3,
            reason_code: ReasonCode::NO_MATCHING_SUBSCRIBERS,
            properties: Properties::new(),
        };
        let bytes = Packet::Pubrec(ack.clone()).pack(V5).unwrap();
        assert_eq!(bytes, [0x50, 0x03, 0x00, 0x03, 0x10]);
        assert_eq!(roundtrip(&Packet::Pubrec(ack.clone()), V5), Packet::Pubrec(ack));
    }

    #[test]
    fn test_ack_v311_ignores_reason() {
        let ack = Ack {
            packet_id: 3,
            reason_code: ReasonCode::UNSPECIFIED_ERROR,
            properties: Properties::new(),
        };
        let bytes = Packet::Puback(ack).pack(V311).unwrap();
        assert_eq!(bytes, [0x40, 0x02, 0x00, 0x03]);
    }

    #[test]
    fn test_pubrel_flags() {
        let bytes = Packet::Pubrel(Ack::new(5)).pack(V311).unwrap();
        assert_eq!(bytes, [0x62, 0x02, 0x00, 0x05]);
        assert_eq!(
            decode_packet(0x60, &[0x00, 0x05], V311),
            Err(ProtocolError::InvalidFlags {
                packet: "PUBREL",
                flags: 0
            })
        );
    }

    #[test]
    fn test_subscribe_v5_options() {
        let options = SubscriptionOptions {
            qos: QoS::ExactlyOnce,
            no_local: true,
            retain_as_published: true,
            retain_handling: 2,
        };
        assert_eq!(options.to_byte(V5), 0x2E);
        assert_eq!(options.to_byte(V311), 0x02);

        let subscribe = Subscribe {
            packet_id: 10,
            filters: vec![
                ("sensor/+/temp".into(), options),
                ("alerts/#".into(), SubscriptionOptions::new(QoS::AtMostOnce)),
            ],
            properties: Properties::new()
                .with(PropertyId::SubscriptionIdentifier, 42u32)
                .unwrap(),
        };
        let packet = Packet::Subscribe(subscribe);
        let bytes = packet.pack(V5).unwrap();
        assert_eq!(bytes[0], 0x82);
        assert_eq!(roundtrip(&packet, V5), packet);
    }

    #[test]
    fn test_subscribe_v311_bytes() {
        let subscribe = Subscribe {
            packet_id: 1,
            filters: vec![("a".into(), SubscriptionOptions::new(QoS::AtLeastOnce))],
            properties: Properties::new(),
        };
        let bytes = Packet::Subscribe(subscribe).pack(V311).unwrap();
        assert_eq!(bytes, [0x82, 0x06, 0x00, 0x01, 0x00, 0x01, b'a', 0x01]);
    }

    #[test]
    fn test_subscribe_empty_rejected() {
        let subscribe = Subscribe {
            packet_id: 1,
            ..Default::default()
        };
        assert!(Packet::Subscribe(subscribe).pack(V311).is_err());
        assert!(decode_packet(0x82, &[0x00, 0x01], V311).is_err());
    }

    #[test]
    fn test_suback_codes_in_order() {
        let suback = Suback {
            packet_id: 4,
            reason_codes: vec![ReasonCode::GRANTED_QOS_1, ReasonCode::UNSPECIFIED_ERROR, ReasonCode::GRANTED_QOS_0],
            properties: Properties::new(),
        };
        for version in [V311, V5] {
            let packet = Packet::Suback(suback.clone());
            assert_eq!(roundtrip(&packet, version), packet);
        }
        let bytes = Packet::Suback(suback).pack(V311).unwrap();
        assert_eq!(bytes, [0x90, 0x05, 0x00, 0x04, 0x01, 0x80, 0x00]);
    }

    #[test]
    fn test_unsubscribe_roundtrip() {
        let unsubscribe = Unsubscribe {
            packet_id: 8,
            filters: vec!["a/b".into(), "c/#".into()],
            properties: Properties::new(),
        };
        for version in [V311, V5] {
            let packet = Packet::Unsubscribe(unsubscribe.clone());
            assert_eq!(roundtrip(&packet, version), packet);
        }
    }

    #[test]
    fn test_unsuback_versions() {
        let unsuback = Unsuback {
            packet_id: 8,
            reason_codes: vec![ReasonCode::SUCCESS, ReasonCode::NO_SUBSCRIPTION_EXISTED],
            properties: Properties::new(),
        };
        let v311 = Packet::Unsuback(unsuback.clone()).pack(V311).unwrap();
        assert_eq!(v311, [0xB0, 0x02, 0x00, 0x08]);
        let packet = Packet::Unsuback(unsuback);
        assert_eq!(roundtrip(&packet, V5), packet);
    }

    #[test]
    fn test_disconnect_forms() {
        let normal = Packet::Disconnect(Disconnect::default());
        assert_eq!(normal.pack(V311).unwrap(), [0xE0, 0x00]);
        assert_eq!(normal.pack(V5).unwrap(), [0xE0, 0x00]);

        let Some(Packet::Disconnect(d)) = decode_packet(0xE0, &[], V5).unwrap() else {
            panic!("expected DISCONNECT");
        };
        assert_eq!(d.reason_code, ReasonCode::NORMAL_DISCONNECTION);

        let mut props = Properties::new();
        props.set(PropertyId::ReasonString, "maintenance").unwrap();
        let shutdown = Packet::Disconnect(Disconnect {
            reason_code: ReasonCode::SERVER_SHUTTING_DOWN,
            properties: props,
        });
        assert_eq!(roundtrip(&shutdown, V5), shutdown);
        assert_eq!(
            Packet::Disconnect(Disconnect::new(ReasonCode::SERVER_SHUTTING_DOWN))
                .pack(V5)
                .unwrap(),
            [0xE0, 0x01, 0x8B]
        );
    }

    #[test]
    fn test_ping() {
        assert_eq!(Packet::Pingreq.pack(V311).unwrap(), [0xC0, 0x00]);
        assert_eq!(Packet::Pingresp.pack(V5).unwrap(), [0xD0, 0x00]);
        assert_eq!(decode_packet(0xD0, &[], V311).unwrap(), Some(Packet::Pingresp));
    }

    #[test]
    fn test_unknown_type_ignored() {
        assert_eq!(decode_packet(0x00, &[], V311).unwrap(), None);
        assert_eq!(decode_packet(0xF0, &[0x00], V5).unwrap(), None);
        assert_eq!(
            decode_frame(&[0x00, 0x00], V311),
            Err(ProtocolError::InvalidPacketType(0))
        );
    }

    #[test]
    fn test_decode_frame_incomplete() {
        let bytes = Packet::from(qos1_publish()).pack(V311).unwrap();
        assert_eq!(decode_frame(&bytes[..0], V311).unwrap(), None);
        assert_eq!(decode_frame(&bytes[..1], V311).unwrap(), None);
        assert_eq!(decode_frame(&bytes[..bytes.len() - 1], V311).unwrap(), None);
    }

    #[test]
    fn test_large_remaining_length() {
        let payload = vec![0xAB; 200];
        let packet = Packet::from(Publish::new("big", payload));
        let bytes = packet.pack(V311).unwrap();
        // 2 + 3 + 200 = 205 needs a two byte varint
        assert_eq!(&bytes[..3], &[0x30, 0xCD, 0x01]);
        assert_eq!(roundtrip(&packet, V311), packet);
    }
}
