//! Shared fixtures for engine-level integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use futures::{SinkExt, StreamExt};
use sessionnet::config::{ChannelConfig, NetworkConfig};
use sessionnet::core::buffer::{ByteBuffer, WireBuffer};
use sessionnet::core::codec::FrameCodec;
use sessionnet::core::packet::{packet_validator, Packet};
use sessionnet::transport::{Channel, IoContext, Session};
use sessionnet::Engine;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn engine() -> Engine {
    Engine::new(NetworkConfig::default()).expect("engine should start")
}

/// Session that sends every unclaimed frame straight back.
pub fn echo_session(ctx: &IoContext) -> Session {
    let session = Session::with_validator(ctx.clone(), packet_validator());
    session.on_receive(|session, frame| {
        let _ = session.send(frame.as_bytes());
    });
    session
}

pub fn listen(engine: &Engine, name: &str, factory: &str, max_sessions: usize) -> (Channel, SocketAddr) {
    let channel = engine
        .create_channel(&ChannelConfig {
            name: name.to_string(),
            session_factory: factory.to_string(),
            max_session_count: max_sessions,
            ..ChannelConfig::default()
        })
        .expect("channel should be created");
    let addr = channel.listen("127.0.0.1:0").expect("listen should succeed");
    (channel, addr)
}

pub fn packet(id: u16, body: &[u8]) -> Packet {
    let mut packet = Packet::new(id);
    packet.write(body).unwrap();
    packet
}

pub async fn raw_client(addr: SocketAddr) -> Framed<TcpStream, FrameCodec> {
    let stream = TcpStream::connect(addr).await.expect("connect");
    Framed::new(stream, FrameCodec::default())
}

pub async fn round_trip(client: &mut Framed<TcpStream, FrameCodec>, packet: Packet) -> ByteBuffer {
    client.send(packet).await.unwrap();
    tokio::time::timeout(WAIT, client.next())
        .await
        .expect("response in time")
        .expect("stream open")
        .expect("valid frame")
}

/// Poll `cond` until it holds or `WAIT` elapses.
pub fn eventually<F: Fn() -> bool>(cond: F) -> bool {
    let deadline = std::time::Instant::now() + WAIT;
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}
