//! Edge case tests for registries, session state and packet routing

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{echo_session, engine, eventually, listen, packet, raw_client, round_trip, WAIT};
use sessionnet::config::ChannelConfig;
use sessionnet::core::buffer::{ByteBuffer, WireBuffer};
use sessionnet::core::packet::{packet_validator, Packet, MAX_PACKET_SIZE};
use sessionnet::error::ProtocolError;
use sessionnet::protocol::PacketDispatcher;
use sessionnet::transport::{IoContext, Session, SessionStatus};
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::Ordering;
use std::sync::mpsc;

// ============================================================================
// Registry Edge Cases
// ============================================================================

#[test]
fn test_duplicate_factory_rejected() {
    let engine = engine();
    engine.register_session_factory("echo", echo_session).unwrap();
    let result = engine.register_session_factory("echo", echo_session);
    assert!(matches!(result, Err(ProtocolError::AlreadyExists(_))));

    let result = engine.register_session_factory("default", echo_session);
    assert!(matches!(result, Err(ProtocolError::AlreadyExists(_))));
    engine.shutdown();
}

#[test]
fn test_unknown_factory_rejected() {
    let engine = engine();
    let result = engine.create_channel(&ChannelConfig {
        name: "orphan".to_string(),
        session_factory: "missing".to_string(),
        ..ChannelConfig::default()
    });
    assert!(matches!(result, Err(ProtocolError::NotExist(_))));
    assert!(engine.channel_names().is_empty());
    assert!(matches!(engine.new_session_from("missing"), Err(ProtocolError::NotExist(_))));
    engine.shutdown();
}

#[test]
fn test_duplicate_channel_rejected() {
    let engine = engine();
    let config = ChannelConfig {
        name: "game".to_string(),
        ..ChannelConfig::default()
    };
    engine.create_channel(&config).unwrap();
    assert!(matches!(
        engine.create_channel(&config),
        Err(ProtocolError::AlreadyExists(_))
    ));
    assert_eq!(engine.channel_names(), vec!["game".to_string()]);
    engine.shutdown();
}

#[test]
fn test_channel_lookup_and_removal() {
    let engine = engine();
    assert!(matches!(engine.channel("nope"), Err(ProtocolError::NotExist(_))));

    let (_, addr) = listen(&engine, "temp", "default", 0);
    let removed = engine.remove_channel("temp").unwrap();
    assert!(!removed.is_listening());
    assert!(matches!(engine.remove_channel("temp"), Err(ProtocolError::NotExist(_))));

    // the port is released once the accept loop observes the close
    assert!(eventually(|| TcpListener::bind(addr).is_ok()));
    engine.shutdown();
}

#[test]
fn test_invalid_channel_config_rejected() {
    let engine = engine();
    let result = engine.create_channel(&ChannelConfig::default());
    assert!(matches!(result, Err(ProtocolError::ConfigError(_))));
    engine.shutdown();
}

#[test]
fn test_listen_twice_rejected() {
    let engine = engine();
    let (channel, _) = listen(&engine, "twice", "default", 0);
    assert!(matches!(
        channel.listen("127.0.0.1:0"),
        Err(ProtocolError::AcceptorRunning)
    ));
    engine.shutdown();
}

// ============================================================================
// Session State Edge Cases
// ============================================================================

#[test]
fn test_send_on_inactive_session() {
    let engine = engine();
    let session = engine.new_session().unwrap();
    assert_eq!(session.status(), SessionStatus::Inactive);
    assert!(matches!(session.send(b"data"), Err(ProtocolError::NotConnected)));
    assert!(!session.close(), "closing an inactive session is a no-op");
    engine.shutdown();
}

#[test]
fn test_connect_without_validator() {
    let engine = engine();
    let session = Session::new(engine.context().clone());
    let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
    let result = engine.block_on(session.connect(addr));
    assert!(matches!(result, Err(ProtocolError::InvalidArgument(_))));
    assert_eq!(engine.metrics().connect_failures.load(Ordering::Relaxed), 0);
    engine.shutdown();
}

#[test]
fn test_connect_refused_reports_failure() {
    let engine = engine();
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let session = engine.new_session().unwrap();
    let (tx, rx) = mpsc::channel();
    session.on_connect(move |_, ok| {
        let _ = tx.send(ok);
    });

    let result = engine.block_on(session.connect(addr));
    assert!(matches!(result, Err(ProtocolError::ConnectionFailed(_))));
    assert!(!rx.recv_timeout(WAIT).unwrap());
    assert_eq!(session.status(), SessionStatus::Inactive);
    assert_eq!(engine.metrics().connect_failures.load(Ordering::Relaxed), 1);
    engine.shutdown();
}

#[test]
fn test_connect_while_active_rejected() {
    let engine = engine();
    let (_, addr) = listen(&engine, "server", "default", 0);

    let session = engine.new_session().unwrap();
    engine.block_on(session.connect(addr)).unwrap();
    assert!(session.is_active());
    assert_eq!(session.status(), SessionStatus::Active);
    assert!(matches!(
        engine.block_on(session.connect(addr)),
        Err(ProtocolError::ActivatedSession)
    ));
    engine.shutdown();
}

#[test]
fn test_start_connect_reports_on_dispatch_pool() {
    let engine = engine();
    let (_, addr) = listen(&engine, "server", "default", 0);

    let session = engine.new_session().unwrap();
    let (tx, rx) = mpsc::channel();
    session.start_connect(addr, move |session, result| {
        let _ = tx.send((result.is_ok(), session.is_active()));
    });
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), (true, true));
    engine.shutdown();
}

#[test]
fn test_client_session_reconnects_after_close() {
    let engine = engine();
    engine.register_session_factory("echo", echo_session).unwrap();
    let (_, addr) = listen(&engine, "echo", "echo", 0);

    let session = engine.new_session().unwrap();
    let (tx, rx) = mpsc::channel();
    session.on_receive(move |_, frame| {
        let _ = tx.send(frame);
    });
    let id = session.id();

    for round in 0u8..3 {
        engine.block_on(session.connect(addr)).unwrap();
        session.send_buffer(&packet(4, &[round])).unwrap();
        let frame = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(frame.as_slice()[4], round);
        assert!(session.close());
        assert_eq!(session.status(), SessionStatus::Inactive);
    }
    assert_eq!(session.id(), id);
    engine.shutdown();
}

// ============================================================================
// Dispatcher Edge Cases
// ============================================================================

#[test]
fn test_dispatcher_duplicate_key() {
    let dispatcher = PacketDispatcher::new();
    dispatcher.register(5, |_, _| Ok(())).unwrap();
    assert!(matches!(
        dispatcher.register(5, |_, _| Ok(())),
        Err(ProtocolError::AlreadyExists(_))
    ));
    assert!(dispatcher.unregister(5));
    assert!(!dispatcher.contains(5));
    dispatcher.register(5, |_, _| Ok(())).unwrap();
}

fn routing_session(ctx: &IoContext) -> Session {
    let session = Session::with_validator(ctx.clone(), packet_validator());
    session
        .dispatcher()
        .register(5, |session, _| session.send_buffer(&packet(6, b"routed")))
        .unwrap();
    session.on_receive(|session, _| {
        let _ = session.send_buffer(&packet(99, b"fallback"));
    });
    session
}

#[test]
fn test_dispatcher_routes_by_id_with_fallback() {
    let engine = engine();
    engine.register_session_factory("routing", routing_session).unwrap();
    let (_, addr) = listen(&engine, "routing", "routing", 0);

    engine.block_on(async {
        let mut client = raw_client(addr).await;
        let routed = Packet::from_bytes(round_trip(&mut client, packet(5, b"")).await.as_slice()).unwrap();
        assert_eq!(routed.id(), 6);
        assert_eq!(routed.body(), b"routed");

        let fallback = Packet::from_bytes(round_trip(&mut client, packet(7, b"")).await.as_slice()).unwrap();
        assert_eq!(fallback.id(), 99);
    });
    engine.shutdown();
}

#[test]
fn test_dispatcher_custom_selector() {
    let engine = engine();
    let session = engine.new_session().unwrap();
    let dispatcher = session.dispatcher();
    dispatcher.set_key_selector(|frame: &ByteBuffer| frame.as_slice().last().map(|b| u16::from(*b)));

    let (tx, rx) = mpsc::channel();
    dispatcher
        .register(42, move |_, frame| {
            let _ = tx.send(frame.len());
            Ok(())
        })
        .unwrap();

    let frame = ByteBuffer::from_slice(&[1, 2, 3, 42]);
    assert!(dispatcher.dispatch(&session, &frame).unwrap());
    assert_eq!(rx.try_recv().unwrap(), 4);
    assert!(!dispatcher.dispatch(&session, &ByteBuffer::from_slice(&[7])).unwrap());
    engine.shutdown();
}

// ============================================================================
// Packet Edge Cases
// ============================================================================

#[test]
fn test_packet_at_size_limit() {
    let mut packet = Packet::new(1);
    packet.write(&vec![0xAB; MAX_PACKET_SIZE - 4]).unwrap();
    assert_eq!(packet.size() as usize, MAX_PACKET_SIZE);
    assert!(matches!(packet.put_u8(0), Err(ProtocolError::BufferOverflow)));
    assert_eq!(packet.len(), MAX_PACKET_SIZE);
}

#[test]
fn test_packet_from_truncated_bytes() {
    assert!(matches!(Packet::from_bytes(&[4, 0, 1]), Err(ProtocolError::BufferUnderflow)));
}

// ============================================================================
// Engine Lifecycle
// ============================================================================

#[test]
fn test_shutdown_is_idempotent() {
    let engine = engine();
    let (channel, _) = listen(&engine, "main", "default", 0);
    engine.shutdown();
    engine.shutdown();
    assert!(engine.is_shut_down());
    assert!(!channel.is_listening());
    assert!(engine.workers().dispatch(|| {}).is_err());
}

#[test]
fn test_error_display_formatting() {
    let err = ProtocolError::WaitTimeout { packet_id: 12 };
    assert!(err.to_string().contains("12"));

    let err = ProtocolError::NotExist("channel 'x'".to_string());
    assert!(err.to_string().contains("channel 'x'"));
}
