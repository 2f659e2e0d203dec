//! MQTT 5.0 properties.
//!
//! A property block is a varint byte length followed by `[id][value]`
//! entries. The wire type of each value is fixed by its identifier, see
//! [`PropertyId::kind`].

use bytes::Bytes;

use crate::codec::{encode_binary, encode_utf8_string, Decoder};
use crate::error::{ProtocolError, Result};
use crate::varint;

/// MQTT 5.0 property identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PropertyId {
    PayloadFormatIndicator = 0x01,
    MessageExpiryInterval = 0x02,
    ContentType = 0x03,
    ResponseTopic = 0x08,
    CorrelationData = 0x09,
    SubscriptionIdentifier = 0x0B,
    SessionExpiryInterval = 0x11,
    AssignedClientIdentifier = 0x12,
    ServerKeepAlive = 0x13,
    AuthenticationMethod = 0x15,
    AuthenticationData = 0x16,
    RequestProblemInformation = 0x17,
    WillDelayInterval = 0x18,
    RequestResponseInformation = 0x19,
    ResponseInformation = 0x1A,
    ServerReference = 0x1C,
    ReasonString = 0x1F,
    ReceiveMaximum = 0x21,
    TopicAliasMaximum = 0x22,
    TopicAlias = 0x23,
    MaximumQos = 0x24,
    RetainAvailable = 0x25,
    UserProperty = 0x26,
    MaximumPacketSize = 0x27,
    WildcardSubscriptionAvailable = 0x28,
    SubscriptionIdentifierAvailable = 0x29,
    SharedSubscriptionAvailable = 0x2A,
}

/// Wire type of a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Byte,
    U16,
    U32,
    Varint,
    Utf8,
    Binary,
    Utf8Pair,
}

impl PropertyId {
    /// The wire type this identifier always carries.
    pub const fn kind(self) -> PropertyKind {
        use PropertyId::*;
        match self {
            PayloadFormatIndicator
            | RequestProblemInformation
            | RequestResponseInformation
            | MaximumQos
            | RetainAvailable
            | WildcardSubscriptionAvailable
            | SubscriptionIdentifierAvailable
            | SharedSubscriptionAvailable => PropertyKind::Byte,
            ServerKeepAlive | ReceiveMaximum | TopicAliasMaximum | TopicAlias => PropertyKind::U16,
            MessageExpiryInterval | SessionExpiryInterval | WillDelayInterval | MaximumPacketSize => {
                PropertyKind::U32
            }
            SubscriptionIdentifier => PropertyKind::Varint,
            ContentType
            | ResponseTopic
            | AssignedClientIdentifier
            | AuthenticationMethod
            | ResponseInformation
            | ServerReference
            | ReasonString => PropertyKind::Utf8,
            CorrelationData | AuthenticationData => PropertyKind::Binary,
            UserProperty => PropertyKind::Utf8Pair,
        }
    }
}

impl TryFrom<u8> for PropertyId {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        use PropertyId::*;
        Ok(match value {
            0x01 => PayloadFormatIndicator,
            0x02 => MessageExpiryInterval,
            0x03 => ContentType,
            0x08 => ResponseTopic,
            0x09 => CorrelationData,
            0x0B => SubscriptionIdentifier,
            0x11 => SessionExpiryInterval,
            0x12 => AssignedClientIdentifier,
            0x13 => ServerKeepAlive,
            0x15 => AuthenticationMethod,
            0x16 => AuthenticationData,
            0x17 => RequestProblemInformation,
            0x18 => WillDelayInterval,
            0x19 => RequestResponseInformation,
            0x1A => ResponseInformation,
            0x1C => ServerReference,
            0x1F => ReasonString,
            0x21 => ReceiveMaximum,
            0x22 => TopicAliasMaximum,
            0x23 => TopicAlias,
            0x24 => MaximumQos,
            0x25 => RetainAvailable,
            0x26 => UserProperty,
            0x27 => MaximumPacketSize,
            0x28 => WildcardSubscriptionAvailable,
            0x29 => SubscriptionIdentifierAvailable,
            0x2A => SharedSubscriptionAvailable,
            _ => {
                return Err(ProtocolError::MalformedPacket(format!(
                    "Unknown property: {:#04x}",
                    value
                )))
            }
        })
    }
}

/// A typed property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Byte(u8),
    U16(u16),
    U32(u32),
    Varint(u32),
    Utf8(String),
    Binary(Bytes),
    Utf8Pair(String, String),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Byte(_) => PropertyKind::Byte,
            PropertyValue::U16(_) => PropertyKind::U16,
            PropertyValue::U32(_) => PropertyKind::U32,
            PropertyValue::Varint(_) => PropertyKind::Varint,
            PropertyValue::Utf8(_) => PropertyKind::Utf8,
            PropertyValue::Binary(_) => PropertyKind::Binary,
            PropertyValue::Utf8Pair(..) => PropertyKind::Utf8Pair,
        }
    }

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            PropertyValue::Byte(v) => buf.push(*v),
            PropertyValue::U16(v) => buf.extend_from_slice(&v.to_be_bytes()),
            PropertyValue::U32(v) => buf.extend_from_slice(&v.to_be_bytes()),
            PropertyValue::Varint(v) => {
                varint::encode(*v, buf)?;
            }
            PropertyValue::Utf8(s) => encode_utf8_string(s, buf)?,
            PropertyValue::Binary(b) => encode_binary(b, buf)?,
            PropertyValue::Utf8Pair(k, v) => {
                encode_utf8_string(k, buf)?;
                encode_utf8_string(v, buf)?;
            }
        }
        Ok(())
    }

    fn decode(kind: PropertyKind, dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(match kind {
            PropertyKind::Byte => PropertyValue::Byte(dec.read_u8()?),
            PropertyKind::U16 => PropertyValue::U16(dec.read_u16()?),
            PropertyKind::U32 => PropertyValue::U32(dec.read_u32()?),
            PropertyKind::Varint => PropertyValue::Varint(dec.read_varint()?),
            PropertyKind::Utf8 => PropertyValue::Utf8(dec.read_utf8()?),
            PropertyKind::Binary => PropertyValue::Binary(dec.read_binary()?),
            PropertyKind::Utf8Pair => {
                let key = dec.read_utf8()?;
                let value = dec.read_utf8()?;
                PropertyValue::Utf8Pair(key, value)
            }
        })
    }
}

impl From<u8> for PropertyValue {
    fn from(v: u8) -> Self {
        PropertyValue::Byte(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Byte(v as u8)
    }
}

impl From<u16> for PropertyValue {
    fn from(v: u16) -> Self {
        PropertyValue::U16(v)
    }
}

impl From<u32> for PropertyValue {
    fn from(v: u32) -> Self {
        PropertyValue::U32(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Utf8(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Utf8(v)
    }
}

impl From<Bytes> for PropertyValue {
    fn from(v: Bytes) -> Self {
        PropertyValue::Binary(v)
    }
}

impl From<&[u8]> for PropertyValue {
    fn from(v: &[u8]) -> Self {
        PropertyValue::Binary(Bytes::copy_from_slice(v))
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(v: Vec<u8>) -> Self {
        PropertyValue::Binary(Bytes::from(v))
    }
}

impl<K: Into<String>, V: Into<String>> From<(K, V)> for PropertyValue {
    fn from((k, v): (K, V)) -> Self {
        PropertyValue::Utf8Pair(k.into(), v.into())
    }
}

/// A property bag.
///
/// Every identifier except [`PropertyId::UserProperty`] holds at most one
/// value; setting it again overwrites. User properties accumulate in the
/// order they were set and may repeat keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: Vec<(PropertyId, PropertyValue)>,
    user: Vec<(String, String)>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a property. Fails if the value's type does not match the
    /// identifier's wire type. A `U32` given for a varint identifier is
    /// accepted as a varint.
    pub fn set(&mut self, id: PropertyId, value: impl Into<PropertyValue>) -> Result<()> {
        let value = match (id.kind(), value.into()) {
            (PropertyKind::Varint, PropertyValue::U32(v)) => PropertyValue::Varint(v),
            (_, v) => v,
        };
        if value.kind() != id.kind() {
            return Err(ProtocolError::PropertyTypeMismatch { id: id as u8 });
        }

        if let PropertyValue::Utf8Pair(key, val) = value {
            self.user.push((key, val));
            return Ok(());
        }

        match self.entries.iter_mut().find(|(existing, _)| *existing == id) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((id, value)),
        }
        Ok(())
    }

    /// Builder form of [`Properties::set`].
    pub fn with(mut self, id: PropertyId, value: impl Into<PropertyValue>) -> Result<Self> {
        self.set(id, value)?;
        Ok(self)
    }

    /// Append a user property.
    pub fn add_user_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.user.push((key.into(), value.into()));
    }

    /// Get a scalar property. User properties are read via
    /// [`Properties::user_properties`].
    pub fn get(&self, id: PropertyId) -> Option<&PropertyValue> {
        self.entries
            .iter()
            .find(|(existing, _)| *existing == id)
            .map(|(_, value)| value)
    }

    pub fn get_u8(&self, id: PropertyId) -> Option<u8> {
        match self.get(id)? {
            PropertyValue::Byte(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u16(&self, id: PropertyId) -> Option<u16> {
        match self.get(id)? {
            PropertyValue::U16(v) => Some(*v),
            _ => None,
        }
    }

    /// Read a four byte integer or varint property.
    pub fn get_u32(&self, id: PropertyId) -> Option<u32> {
        match self.get(id)? {
            PropertyValue::U32(v) | PropertyValue::Varint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, id: PropertyId) -> Option<&str> {
        match self.get(id)? {
            PropertyValue::Utf8(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_binary(&self, id: PropertyId) -> Option<&Bytes> {
        match self.get(id)? {
            PropertyValue::Binary(v) => Some(v),
            _ => None,
        }
    }

    pub fn has(&self, id: PropertyId) -> bool {
        match id {
            PropertyId::UserProperty => !self.user.is_empty(),
            _ => self.get(id).is_some(),
        }
    }

    /// Remove a property. Removing [`PropertyId::UserProperty`] drops all
    /// user pairs. Returns whether anything was removed.
    pub fn remove(&mut self, id: PropertyId) -> bool {
        if id == PropertyId::UserProperty {
            let had = !self.user.is_empty();
            self.user.clear();
            return had;
        }
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| *existing != id);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.user.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.user.is_empty()
    }

    /// Number of wire entries, counting each user pair.
    pub fn len(&self) -> usize {
        self.entries.len() + self.user.len()
    }

    /// Scalar properties in the order they were first set.
    pub fn iter(&self) -> impl Iterator<Item = (PropertyId, &PropertyValue)> {
        self.entries.iter().map(|(id, value)| (*id, value))
    }

    pub fn user_properties(&self) -> &[(String, String)] {
        &self.user
    }

    /// Append the length-prefixed property block to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        let mut body = Vec::new();
        for (id, value) in &self.entries {
            body.push(*id as u8);
            value.encode(&mut body)?;
        }
        for (key, value) in &self.user {
            body.push(PropertyId::UserProperty as u8);
            encode_utf8_string(key, &mut body)?;
            encode_utf8_string(value, &mut body)?;
        }
        varint::encode(body.len() as u32, buf)?;
        buf.extend_from_slice(&body);
        Ok(())
    }

    /// Serialize to a standalone property block. An empty bag is `[0x00]`.
    pub fn pack(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Parse a property block at `offset`, returning the bag and the offset
    /// just past the block.
    pub fn unpack(buf: &[u8], offset: usize) -> Result<(Properties, usize)> {
        let mut dec = Decoder::at(buf, offset);
        let props = Self::decode(&mut dec)?;
        Ok((props, dec.position()))
    }

    /// Read a property block from the decoder's current position.
    ///
    /// An unrecognized identifier ends parsing of the block: entries after it
    /// are dropped and the cursor resumes at the end of the block.
    pub fn decode(dec: &mut Decoder<'_>) -> Result<Properties> {
        let len = dec.read_varint()? as usize;
        if dec.remaining() < len {
            return Err(ProtocolError::Incomplete {
                needed: len,
                have: dec.remaining(),
            });
        }
        let end = dec.position() + len;
        let mut props = Properties::new();

        while dec.position() < end {
            let raw = dec.read_u8()?;
            let Ok(id) = PropertyId::try_from(raw) else {
                log::debug!("Unknown property {:#04x}, skipping rest of block", raw);
                break;
            };
            let value = PropertyValue::decode(id.kind(), dec)?;
            if dec.position() > end {
                return Err(ProtocolError::MalformedPacket(format!(
                    "Property {:#04x} overruns its block",
                    raw
                )));
            }
            props.set(id, value)?;
        }

        dec.seek(end)?;
        Ok(props)
    }
}
