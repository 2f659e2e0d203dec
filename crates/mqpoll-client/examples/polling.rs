//! Polling API example: drive the client from your own loop.
//!
//! Run with: cargo run -p mqpoll-client --example polling -- [host] [port]
//!
//! This style suits:
//! - cooperative schedulers and main loops that own the timing
//! - tests that need exact control over when I/O happens

use std::time::Duration;

use mqpoll_client::{Client, ClientConfig, ClientEvent, Properties, QoS, ReasonCode};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "localhost".to_string());
    let port = args.next().map(|p| p.parse()).transpose()?.unwrap_or(1883);

    let config = ClientConfig::new("polling-example")
        .mqtt5()
        .clean_start(true);
    let mut client = Client::new(config);
    client.will_set("example/polling/status", &b"offline"[..], QoS::AtLeastOnce, true, Properties::new())?;

    log::info!("Connecting to {}:{}", host, port);
    client.connect(&host, port, 30)?;

    client.subscribe("example/polling/#", QoS::AtLeastOnce)?;
    let info = client.publish(
        "example/polling/hello",
        &b"Hello from polling client!"[..],
        QoS::AtLeastOnce,
        false,
        Properties::new(),
    )?;

    while client.is_connected() {
        if let Err(e) = client.loop_once(Duration::from_millis(100)) {
            log::warn!("Loop ended: {}", e);
            break;
        }

        while let Some(event) = client.next_event() {
            match event {
                ClientEvent::Connect { session_present, reason_code, .. } => {
                    println!("Connected: {} (session present: {})", reason_code, session_present);
                }
                ClientEvent::Subscribed { mid, reason_codes, .. } => {
                    println!("Subscribed (mid={}): {:?}", mid, reason_codes);
                }
                ClientEvent::Published { mid, reason_code, .. } => {
                    println!("Published mid={}: {} (confirmed: {})", mid, reason_code, info.is_confirmed());
                }
                ClientEvent::Message(message) => {
                    println!(
                        "Message: {} -> {} (QoS={:?}, retain={})",
                        message.topic,
                        String::from_utf8_lossy(&message.payload),
                        message.qos,
                        message.retain
                    );
                    client.disconnect(ReasonCode::NORMAL_DISCONNECTION, Properties::new())?;
                }
                ClientEvent::Disconnect { reason_code, .. } => {
                    println!("Disconnected: {}", reason_code);
                }
                ClientEvent::Unsubscribed { .. } | ClientEvent::Log { .. } => {}
            }
        }
    }

    Ok(())
}
