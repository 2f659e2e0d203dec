//! Client configuration types.

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use mqpoll_core::{Properties, ProtocolVersion, Will};

/// Client configuration.
///
/// With the `serde` feature this deserializes with every field optional;
/// durations are given in (fractional) seconds.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClientConfig {
    /// Client identifier. Empty lets the broker assign one (MQTT 5.0) or
    /// requires clean start (3.1.1).
    pub client_id: String,
    pub protocol_version: ProtocolVersion,
    /// Clean start (5.0) / clean session (3.1.1).
    pub clean_start: bool,
    /// Keep-alive in seconds used when `connect` is not given one (0 = disabled).
    pub keep_alive: u16,
    /// Timeout for each TCP connect attempt.
    #[cfg_attr(feature = "serde", serde(deserialize_with = "secs::deserialize"))]
    pub connect_timeout: Duration,
    /// Number of TCP connect attempts before giving up.
    pub connect_attempts: u32,
    /// Delay between failed connect attempts.
    #[cfg_attr(feature = "serde", serde(deserialize_with = "secs::deserialize"))]
    pub retry_delay: Duration,
    /// How long to wait for CONNACK after sending CONNECT.
    #[cfg_attr(feature = "serde", serde(deserialize_with = "secs::deserialize"))]
    pub connack_timeout: Duration,
    /// Deadline for the rest of a packet once its first byte has arrived.
    #[cfg_attr(feature = "serde", serde(deserialize_with = "secs::deserialize"))]
    pub socket_timeout: Duration,
    /// Deadline for writing one packet when the socket keeps blocking.
    #[cfg_attr(feature = "serde", serde(deserialize_with = "secs::deserialize"))]
    pub send_timeout: Duration,
    /// Whether `loop_forever` reconnects after the connection drops.
    pub auto_reconnect: bool,
    /// Pause before each reconnect attempt in `loop_forever`.
    #[cfg_attr(feature = "serde", serde(deserialize_with = "secs::deserialize"))]
    pub reconnect_delay: Duration,
    /// Sleep after each `loop_forever` iteration.
    #[cfg_attr(feature = "serde", serde(deserialize_with = "secs::deserialize"))]
    pub loop_sleep: Duration,
    /// Outbound QoS 1/2 messages allowed in flight at once (0 = unlimited).
    pub max_inflight_messages: u16,
    /// Idle time after which the transport is asked to release spare buffers.
    #[cfg_attr(feature = "serde", serde(deserialize_with = "secs::deserialize"))]
    pub idle_reclaim_interval: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub will: Option<Will>,
    /// Properties sent with CONNECT (MQTT 5.0 only).
    #[cfg_attr(feature = "serde", serde(skip))]
    pub connect_properties: Properties,
    /// TLS settings; `None` connects in plain TCP.
    pub tls: Option<TlsConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            protocol_version: ProtocolVersion::V311,
            clean_start: true,
            keep_alive: 60,
            connect_timeout: Duration::from_secs(30),
            connect_attempts: 3,
            retry_delay: Duration::from_secs(2),
            connack_timeout: Duration::from_secs(10),
            socket_timeout: Duration::from_secs(1),
            send_timeout: Duration::from_secs(10),
            auto_reconnect: false,
            reconnect_delay: Duration::from_secs(5),
            loop_sleep: Duration::ZERO,
            max_inflight_messages: 20,
            idle_reclaim_interval: Duration::from_secs(10),
            username: None,
            password: None,
            will: None,
            connect_properties: Properties::new(),
            tls: None,
        }
    }
}

impl ClientConfig {
    /// Create a new config with the given client id.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    /// Use MQTT 5.0 protocol.
    pub fn mqtt5(mut self) -> Self {
        self.protocol_version = ProtocolVersion::V5;
        self
    }

    pub fn protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn clean_start(mut self, clean: bool) -> Self {
        self.clean_start = clean;
        self
    }

    /// Set keep-alive interval in seconds.
    pub fn keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = seconds;
        self
    }

    /// Set username and password.
    pub fn credentials(mut self, username: impl Into<String>, password: Option<&str>) -> Self {
        self.username = Some(username.into());
        self.password = password.map(str::to_string);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set connect attempts (at least one is always made) and the delay
    /// between them.
    pub fn connect_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.connect_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    pub fn connack_timeout(mut self, timeout: Duration) -> Self {
        self.connack_timeout = timeout;
        self
    }

    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Enable reconnecting from `loop_forever`, waiting `delay` before each
    /// attempt.
    pub fn auto_reconnect(mut self, enabled: bool, delay: Duration) -> Self {
        self.auto_reconnect = enabled;
        self.reconnect_delay = delay;
        self
    }

    pub fn loop_sleep(mut self, sleep: Duration) -> Self {
        self.loop_sleep = sleep;
        self
    }

    pub fn max_inflight_messages(mut self, max: u16) -> Self {
        self.max_inflight_messages = max;
        self
    }

    pub fn idle_reclaim_interval(mut self, interval: Duration) -> Self {
        self.idle_reclaim_interval = interval;
        self
    }

    /// Set the last-will message registered with CONNECT.
    pub fn will(mut self, will: Will) -> Self {
        self.will = Some(will);
        self
    }

    pub fn connect_properties(mut self, properties: Properties) -> Self {
        self.connect_properties = properties;
        self
    }

    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub(crate) fn password_bytes(&self) -> Option<Bytes> {
        self.password
            .as_ref()
            .map(|p| Bytes::copy_from_slice(p.as_bytes()))
    }
}

/// TLS settings. Requires the `tls` feature at connect time.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TlsConfig {
    /// CA bundle (PEM). The webpki roots are used when unset.
    pub ca_cert: Option<PathBuf>,
    /// Client certificate chain (PEM) for mutual TLS.
    pub client_cert: Option<PathBuf>,
    /// Client private key (PEM) for mutual TLS.
    pub client_key: Option<PathBuf>,
    /// SNI / verification name; defaults to the connect host.
    pub server_name: Option<String>,
    /// Skip certificate verification. Only for self-signed test brokers.
    pub accept_invalid_certs: bool,
}

#[cfg(feature = "serde")]
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.keep_alive, 60);
        assert_eq!(config.connect_attempts, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(2));
        assert_eq!(config.connack_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.protocol_version, ProtocolVersion::V311);
        assert!(config.clean_start);
        assert!(config.tls.is_none());
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::new("sensor-1")
            .mqtt5()
            .keep_alive(15)
            .credentials("user", Some("secret"))
            .auto_reconnect(true, Duration::from_millis(500));
        assert_eq!(config.client_id, "sensor-1");
        assert!(config.protocol_version.is_v5());
        assert_eq!(config.keep_alive, 15);
        assert_eq!(config.password_bytes().as_deref(), Some(&b"secret"[..]));
        assert!(config.auto_reconnect);
        assert_eq!(config.reconnect_delay, Duration::from_millis(500));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_deserialize_toml() {
        let config: ClientConfig = toml::from_str(
            r#"
            client_id = "dev-7"
            protocol_version = "V5"
            keep_alive = 30
            connack_timeout = 2.5
            auto_reconnect = true

            [tls]
            server_name = "broker.local"
            "#,
        )
        .unwrap();
        assert_eq!(config.client_id, "dev-7");
        assert_eq!(config.protocol_version, ProtocolVersion::V5);
        assert_eq!(config.connack_timeout, Duration::from_millis(2500));
        assert_eq!(config.connect_attempts, 3);
        assert!(config.auto_reconnect);
        assert_eq!(
            config.tls.and_then(|t| t.server_name).as_deref(),
            Some("broker.local")
        );
    }
}
