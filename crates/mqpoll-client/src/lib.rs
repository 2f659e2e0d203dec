//! mqpoll-client - Single-threaded polling MQTT client.
//!
//! No background thread or task: [`Client::connect`] blocks until CONNACK,
//! publishes and subscriptions write straight to the socket, and everything
//! inbound (acknowledgements, messages, keep-alive) is processed by calls to
//! [`Client::loop_once`]. Outcomes are queued as [`ClientEvent`]s, or
//! dispatched to an [`MqttHandler`] by [`CallbackClient`].
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use mqpoll_client::{Client, ClientConfig, ClientEvent, Properties, QoS};
//!
//! let mut client = Client::new(ClientConfig::new("sensor-1").mqtt5());
//! client.connect("localhost", 1883, 60)?;
//! client.subscribe("commands/#", QoS::AtLeastOnce)?;
//! client.publish("sensors/temp", &b"25.5"[..], QoS::AtLeastOnce, false, Properties::new())?;
//!
//! loop {
//!     client.loop_once(Duration::from_secs(1))?;
//!     while let Some(event) = client.next_event() {
//!         if let ClientEvent::Message(message) = event {
//!             println!("{}: {:?}", message.topic, message.payload_str());
//!         }
//!     }
//! }
//! ```

mod callback;
mod client;
mod clock;
mod config;
mod connection;
mod error;
mod events;
mod message;
mod packet_id;
mod session;
#[cfg(feature = "tls")]
mod tls;
mod transport;

#[cfg(test)]
mod mock;

pub use callback::{CallbackClient, MqttHandler};
pub use client::{Client, ServerCapabilities};
pub use clock::{Clock, SystemClock};
pub use config::{ClientConfig, TlsConfig};
pub use connection::{read_packet, send_packet};
pub use error::{ClientError, Result};
pub use events::{ClientEvent, ConnectionState};
pub use message::{Message, MessageInfo, MessageState};
#[cfg(feature = "tls")]
pub use tls::TlsTransport;
pub use transport::{Connector, TcpConnector, TcpTransport, Transport};

// Re-export useful types from core
pub use mqpoll_core::{
    topic, Packet, Properties, PropertyId, ProtocolVersion, Publish, QoS, ReasonCode,
    SubscriptionOptions, Will,
};
