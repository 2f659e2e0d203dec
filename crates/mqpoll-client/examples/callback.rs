//! Callback API example: the client runs the loop and calls a handler.
//!
//! Run with: cargo run -p mqpoll-client --example callback -- [host] [port]
//!
//! Messages on `example/callback/alerts/#` go to a dedicated callback; the
//! rest reach `on_message`. The client disconnects after a few messages.

use std::time::Duration;

use mqpoll_client::{
    CallbackClient, Client, ClientConfig, Message, MqttHandler, Properties, QoS, ReasonCode,
};

/// Handler state: anything the application needs between callbacks.
struct MyHandler {
    message_count: usize,
    limit: usize,
}

impl MqttHandler for MyHandler {
    fn on_connect(
        &mut self,
        client: &mut Client,
        session_present: bool,
        reason_code: ReasonCode,
        _properties: &Properties,
    ) {
        if reason_code != ReasonCode::SUCCESS {
            eprintln!("Connection failed: {}", reason_code);
            return;
        }
        println!("Connected! Session present: {}", session_present);

        if let Err(e) = client.subscribe("example/callback/#", QoS::AtLeastOnce) {
            eprintln!("Subscribe error: {}", e);
        }
        for (topic, payload) in [
            ("example/callback/hello", &b"Hello from callback client!"[..]),
            ("example/callback/alerts/disk", &b"85% full"[..]),
        ] {
            if let Err(e) = client.publish(topic, payload, QoS::ExactlyOnce, false, Properties::new()) {
                eprintln!("Publish error: {}", e);
            }
        }
    }

    fn on_message(&mut self, client: &mut Client, message: &Message) {
        println!(
            "Message: {} -> {} (QoS={:?}, retain={})",
            message.topic,
            String::from_utf8_lossy(&message.payload),
            message.qos,
            message.retain
        );

        self.message_count += 1;
        if self.message_count >= self.limit {
            let _ = client.disconnect(ReasonCode::NORMAL_DISCONNECTION, Properties::new());
        }
    }

    fn on_publish(&mut self, _client: &mut Client, mid: u16, reason_code: ReasonCode, _properties: &Properties) {
        println!("Publish complete (mid={}): {}", mid, reason_code);
    }

    fn on_subscribe(
        &mut self,
        _client: &mut Client,
        mid: u16,
        reason_codes: &[ReasonCode],
        _properties: &Properties,
    ) {
        println!("Subscribed (mid={}): {:?}", mid, reason_codes);
    }

    fn on_disconnect(&mut self, _client: &mut Client, reason_code: ReasonCode, _properties: &Properties) {
        println!("Disconnected: {}", reason_code);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "localhost".to_string());
    let port = args.next().map(|p| p.parse()).transpose()?.unwrap_or(1883);

    let config = ClientConfig::new("callback-example")
        .mqtt5()
        .auto_reconnect(true, Duration::from_secs(5));
    let handler = MyHandler {
        message_count: 0,
        limit: 1,
    };
    let mut client = CallbackClient::new(config, handler);

    client.message_callback_add("example/callback/alerts/#", |_client, message| {
        println!("ALERT {}: {}", message.topic, String::from_utf8_lossy(&message.payload));
    });

    log::info!("Connecting to {}:{}", host, port);
    if let Err(e) = client.connect(&host, port, 30) {
        log::warn!("First connection failed: {}", e);
    }

    client.loop_forever(Duration::from_secs(1), true)?;
    println!("Done after {} message(s)", client.handler().message_count);
    Ok(())
}
