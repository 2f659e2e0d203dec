//! mqpoll-core - MQTT 3.1.1 / 5.0 wire codec.
//!
//! Variable byte integers, length-prefixed primitives, MQTT 5.0 property
//! bags, the fourteen client-facing control packets and topic filter
//! matching. Everything here is pure and allocation-light; the client crate
//! layers transport and session state on top.

pub mod codec;
pub mod error;
pub mod packet;
pub mod property;
pub mod reason;
pub mod topic;
pub mod varint;

pub use error::{ProtocolError, Result};
pub use packet::*;
pub use property::{Properties, PropertyId, PropertyKind, PropertyValue};
pub use reason::ReasonCode;
