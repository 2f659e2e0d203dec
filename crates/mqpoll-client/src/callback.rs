//! Callback-based MQTT client API.
//!
//! Provides an event-driven interface using the `MqttHandler` trait.

use std::time::Duration;

use bytes::Bytes;
use log::Level;
use mqpoll_core::{topic, Properties, QoS, ReasonCode, SubscriptionOptions};

use crate::client::Client;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::ClientEvent;
use crate::message::{Message, MessageInfo};

/// Handler trait for MQTT events.
///
/// All methods have default implementations that do nothing. Each receives
/// the client, so handlers can publish or subscribe in response.
pub trait MqttHandler {
    /// A connection attempt finished; `reason_code` is SUCCESS on success.
    #[allow(unused_variables)]
    fn on_connect(
        &mut self,
        client: &mut Client,
        session_present: bool,
        reason_code: ReasonCode,
        properties: &Properties,
    ) {
    }

    /// The connection ended. Local failures carry NETWORK_ERROR,
    /// UNSPECIFIED_ERROR or KEEPALIVE_TIMEOUT; a server DISCONNECT carries the
    /// broker's code.
    #[allow(unused_variables)]
    fn on_disconnect(&mut self, client: &mut Client, reason_code: ReasonCode, properties: &Properties) {}

    /// A message arrived that no pattern callback claimed.
    #[allow(unused_variables)]
    fn on_message(&mut self, client: &mut Client, message: &Message) {}

    /// An outbound publish completed (mid 0 for QoS 0).
    #[allow(unused_variables)]
    fn on_publish(&mut self, client: &mut Client, mid: u16, reason_code: ReasonCode, properties: &Properties) {}

    /// SUBACK: one granted QoS or failure code per requested filter.
    #[allow(unused_variables)]
    fn on_subscribe(
        &mut self,
        client: &mut Client,
        mid: u16,
        reason_codes: &[ReasonCode],
        properties: &Properties,
    ) {
    }

    /// UNSUBACK. `reason_codes` is empty for MQTT 3.1.1.
    #[allow(unused_variables)]
    fn on_unsubscribe(
        &mut self,
        client: &mut Client,
        mid: u16,
        reason_codes: &[ReasonCode],
        properties: &Properties,
    ) {
    }

    /// Connection-level diagnostics.
    #[allow(unused_variables)]
    fn on_log(&mut self, client: &mut Client, level: Level, message: &str) {}
}

type MessageCallback = Box<dyn FnMut(&mut Client, &Message) + Send>;

/// Callback-based MQTT client.
///
/// Wraps the core `Client` and dispatches its events to a handler. Messages
/// whose topic matches a pattern registered with
/// [`message_callback_add`](CallbackClient::message_callback_add) go to that
/// callback instead of `on_message`; the first matching pattern, in
/// registration order, wins.
pub struct CallbackClient<H: MqttHandler> {
    client: Client,
    handler: H,
    message_callbacks: Vec<(String, MessageCallback)>,
    running: bool,
}

impl<H: MqttHandler> CallbackClient<H> {
    /// Create a new callback client over TCP (or TLS when configured).
    pub fn new(config: ClientConfig, handler: H) -> Self {
        Self::with_client(Client::new(config), handler)
    }

    /// Wrap an existing client.
    pub fn with_client(client: Client, handler: H) -> Self {
        Self {
            client,
            handler,
            message_callbacks: Vec::new(),
            running: false,
        }
    }

    /// Route messages matching `filter` to `callback`. Re-adding a filter
    /// replaces its callback.
    pub fn message_callback_add<F>(&mut self, filter: &str, callback: F)
    where
        F: FnMut(&mut Client, &Message) + Send + 'static,
    {
        match self.message_callbacks.iter_mut().find(|(f, _)| f == filter) {
            Some((_, existing)) => *existing = Box::new(callback),
            None => self
                .message_callbacks
                .push((filter.to_string(), Box::new(callback))),
        }
    }

    pub fn message_callback_remove(&mut self, filter: &str) {
        self.message_callbacks.retain(|(f, _)| f != filter);
    }

    // === Forwarded operations (events are dispatched before returning) ===

    pub fn connect(&mut self, host: &str, port: u16, keep_alive: u16) -> Result<()> {
        let result = self.client.connect(host, port, keep_alive);
        self.dispatch_events();
        result
    }

    pub fn reconnect(&mut self) -> Result<()> {
        let result = self.client.reconnect();
        self.dispatch_events();
        result
    }

    pub fn disconnect(&mut self, reason_code: ReasonCode, properties: Properties) -> Result<()> {
        let result = self.client.disconnect(reason_code, properties);
        self.dispatch_events();
        result
    }

    pub fn publish(
        &mut self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
        properties: Properties,
    ) -> Result<MessageInfo> {
        let result = self.client.publish(topic, payload, qos, retain, properties);
        self.dispatch_events();
        result
    }

    pub fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<u16> {
        let result = self.client.subscribe(filter, qos);
        self.dispatch_events();
        result
    }

    pub fn subscribe_with_options(
        &mut self,
        filters: &[(&str, SubscriptionOptions)],
        properties: Properties,
    ) -> Result<u16> {
        let result = self.client.subscribe_with_options(filters, properties);
        self.dispatch_events();
        result
    }

    /// Unsubscribe, also dropping pattern callbacks registered for `filters`.
    pub fn unsubscribe(&mut self, filters: &[&str], properties: Properties) -> Result<u16> {
        let result = self.client.unsubscribe(filters, properties);
        if result.is_ok() {
            self.message_callbacks
                .retain(|(f, _)| !filters.contains(&f.as_str()));
        }
        self.dispatch_events();
        result
    }

    pub fn username_pw_set(&mut self, username: &str, password: Option<&str>) {
        self.client.username_pw_set(username, password);
    }

    pub fn will_set(
        &mut self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
        properties: Properties,
    ) -> Result<()> {
        self.client.will_set(topic, payload, qos, retain, properties)
    }

    pub fn will_clear(&mut self) {
        self.client.will_clear();
    }

    /// Make `loop_forever` return after its current iteration.
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut Client {
        &mut self.client
    }

    // === Loop ===

    /// One client iteration, then dispatch everything it produced.
    pub fn loop_once(&mut self, timeout: Duration) -> Result<()> {
        let result = self.client.loop_once(timeout);
        self.dispatch_events();
        result
    }

    /// Loop until the connection ends.
    ///
    /// Returns `Ok` after a user-initiated disconnect or [`stop`](Self::stop).
    /// When the connection drops otherwise, reconnects after
    /// `reconnect_delay` if `auto_reconnect` is set, or returns the error.
    /// With `retry_first_connection`, a client that is not yet connected keeps
    /// reconnecting until it is.
    pub fn loop_forever(&mut self, timeout: Duration, retry_first_connection: bool) -> Result<()> {
        self.running = true;
        let reconnect_delay = self.client.config().reconnect_delay;
        let loop_sleep = self.client.config().loop_sleep;

        if retry_first_connection {
            while self.running && !self.client.is_connected() && !self.client.user_disconnected() {
                match self.reconnect() {
                    Ok(()) => {}
                    Err(e @ ClientError::InvalidState(_)) => return Err(e),
                    Err(e) => {
                        log::warn!("Initial connection failed: {}", e);
                        std::thread::sleep(reconnect_delay);
                    }
                }
            }
        }

        while self.running {
            match self.loop_once(timeout) {
                Ok(()) => {
                    if !loop_sleep.is_zero() {
                        std::thread::sleep(loop_sleep);
                    }
                }
                Err(_) if self.client.user_disconnected() => break,
                Err(e) if !self.client.config().auto_reconnect => return Err(e),
                Err(e) => {
                    log::info!("Connection lost ({}), reconnecting in {:?}", e, reconnect_delay);
                    std::thread::sleep(reconnect_delay);
                    match self.reconnect() {
                        Ok(()) => {}
                        Err(e @ ClientError::InvalidState(_)) => return Err(e),
                        Err(e) => log::warn!("Reconnect failed: {}", e),
                    }
                }
            }
        }
        self.running = false;
        Ok(())
    }

    fn dispatch_events(&mut self) {
        while let Some(event) = self.client.next_event() {
            self.dispatch_event(event);
        }
    }

    /// Dispatch an event to the handler.
    fn dispatch_event(&mut self, event: ClientEvent) {
        let client = &mut self.client;
        match event {
            ClientEvent::Connect {
                session_present,
                reason_code,
                properties,
            } => self
                .handler
                .on_connect(client, session_present, reason_code, &properties),
            ClientEvent::Disconnect {
                reason_code,
                properties,
            } => self.handler.on_disconnect(client, reason_code, &properties),
            ClientEvent::Message(message) => {
                let routed = self
                    .message_callbacks
                    .iter_mut()
                    .find(|(filter, _)| topic::matches(filter, &message.topic));
                match routed {
                    Some((_, callback)) => callback(client, &message),
                    None => self.handler.on_message(client, &message),
                }
            }
            ClientEvent::Published {
                mid,
                reason_code,
                properties,
            } => self.handler.on_publish(client, mid, reason_code, &properties),
            ClientEvent::Subscribed {
                mid,
                reason_codes,
                properties,
            } => self
                .handler
                .on_subscribe(client, mid, &reason_codes, &properties),
            ClientEvent::Unsubscribed {
                mid,
                reason_codes,
                properties,
            } => self
                .handler
                .on_unsubscribe(client, mid, &reason_codes, &properties),
            ClientEvent::Log { level, message } => self.handler.on_log(client, level, &message),
        }
    }
}
