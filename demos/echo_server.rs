//! Example: Echo Server With a Pooled Channel
//!
//! Starts an engine, registers an echo session factory and listens on a channel
//! capped at 64 sessions. A client session then connects, sends a request and
//! awaits the echoed reply.
//!
//! Run with: `cargo run --example echo_server -- 127.0.0.1:10100`

#![allow(clippy::uninlined_format_args)]

use sessionnet::config::{ChannelConfig, LoggingConfig, NetworkConfig};
use sessionnet::core::buffer::WireBuffer;
use sessionnet::core::packet::{packet_validator, Packet};
use sessionnet::transport::Session;
use sessionnet::utils::logging::init_logging;
use sessionnet::Engine;
use std::time::Duration;

const ECHO_ID: u16 = 1;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(&LoggingConfig::default())?;

    let listen = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:10100".to_string());

    let engine = Engine::new(NetworkConfig::default())?;
    engine.register_session_factory("echo", |ctx| {
        let session = Session::with_validator(ctx.clone(), packet_validator());
        session.on_accept(|session| {
            println!("accepted {:?} as session {}", session.peer_addr(), session.id());
        });
        session.on_receive(|session, frame| {
            if let Err(e) = session.send(frame.as_bytes()) {
                eprintln!("echo failed: {}", e);
            }
        });
        session.on_close(|session, reason| {
            println!("session {} closed: {}", session.id(), reason);
        });
        session
    })?;

    let channel = engine.create_channel(&ChannelConfig {
        name: "echo".to_string(),
        session_factory: "echo".to_string(),
        max_session_count: 64,
        ..ChannelConfig::default()
    })?;
    let addr = channel.listen(&listen)?;
    println!("listening on {}", addr);

    let client = engine.new_session()?;
    engine.block_on(client.connect(addr))?;

    let mut request = Packet::new(ECHO_ID);
    request.put_str_utf8("hello, pool")?;
    let mut reply = engine.block_on(
        client
            .awaitable()
            .with_timeout(Duration::from_secs(2))
            .send_and_wait(&request, ECHO_ID),
    )?;
    reply.skip_header();
    println!("echoed: {}", reply.get_str_utf8()?);

    client.close();
    println!(
        "channel '{}': {} active, {} pooled",
        channel.name(),
        channel.active_count(),
        channel.inactive_count()
    );
    engine.shutdown();
    Ok(())
}
