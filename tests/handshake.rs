//! Upgrade handshakes through `Server` over loopback.

mod common;

use std::{
    io::{Read, Write},
    thread::{sleep, spawn},
    time::Duration,
};

use common::{init_test_logging, local_server, tick_until, upgrade_request, Client};
use tickws::{
    derive_accept_key, protocol::frame::Frame, BusyPolicy, Config, Error, HandshakeError, Router, SessionState,
    TickEvent,
};

#[test]
fn accepts_upgrade() {
    init_test_logging();
    let mut server = local_server(Config::default());
    let addr = server.local_addr().unwrap();
    let mut router = Router::new();

    let client = spawn(move || {
        let (_client, head) = Client::upgrade(addr, "dGhlIHNhbXBsZSBub25jZQ==");
        head
    });

    assert!(matches!(
        tick_until(&mut server, &mut router, |event| !matches!(event, TickEvent::Idle)),
        TickEvent::Connected(_)
    ));
    assert_eq!(server.state(), SessionState::Connected);

    let head = client.join().unwrap();
    assert_eq!(
        head,
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
         \r\n"
    );
}

#[test]
fn accept_key_matches_derivation() {
    init_test_logging();
    let mut server = local_server(Config::default());
    let addr = server.local_addr().unwrap();
    let mut router = Router::new();

    for key in ["AQIDBAUGBwgJCgsMDQ4PEA==", "x3JJHMbDL1EzLkh9GBhXDw=="] {
        let client = spawn(move || Client::upgrade(addr, key).1);
        tick_until(&mut server, &mut router, |event| matches!(event, TickEvent::Connected(_)));
        let head = client.join().unwrap();
        assert!(head.contains(&format!("Sec-WebSocket-Accept: {}\r\n", derive_accept_key(key.as_bytes()))));
        server.disconnect();
    }
}

#[test]
fn rejects_bad_request_and_keeps_listening() {
    init_test_logging();
    let mut server = local_server(Config::default());
    let addr = server.local_addr().unwrap();
    let mut router = Router::new();

    let client = spawn(move || {
        let mut bad = Client::connect(addr);
        bad.stream
            .write_all(b"GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n")
            .unwrap();
        // Closed without any response.
        assert_eq!(bad.read_head(), None);

        let (_good, head) = Client::upgrade(addr, "dGhlIHNhbXBsZSBub25jZQ==");
        assert!(head.starts_with("HTTP/1.1 101"));
    });

    match tick_until(&mut server, &mut router, |event| !matches!(event, TickEvent::Idle)) {
        TickEvent::HandshakeFailed(Error::Handshake(HandshakeError::MissingHeader("Sec-WebSocket-Key"))) => {}
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(server.state(), SessionState::Closed);
    tick_until(&mut server, &mut router, |event| matches!(event, TickEvent::Connected(_)));
    client.join().unwrap();
}

#[test]
fn rejects_oversized_head() {
    init_test_logging();
    let mut server = local_server(Config::default().max_header_size(1024));
    let addr = server.local_addr().unwrap();
    let mut router = Router::new();

    let client = spawn(move || {
        let mut client = Client::connect(addr);
        let mut request = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..200 {
            request.extend_from_slice(format!("X-Padding-{i}: 0123456789\r\n").as_bytes());
        }
        // The server may close before everything is written.
        let _ = client.stream.write_all(&request);
        let mut rest = Vec::new();
        let _ = client.stream.read_to_end(&mut rest);
        assert!(!rest.starts_with(b"HTTP/1.1 101"));
    });

    match tick_until(&mut server, &mut router, |event| !matches!(event, TickEvent::Idle)) {
        TickEvent::HandshakeFailed(Error::Handshake(HandshakeError::HeaderTooLarge(1024))) => {}
        other => panic!("unexpected {other:?}"),
    }
    client.join().unwrap();
}

#[test]
fn silent_peer_times_out() {
    init_test_logging();
    let config = Config::default().handshake_timeout(Some(Duration::from_millis(100)));
    let mut server = local_server(config);
    let addr = server.local_addr().unwrap();
    let mut router = Router::new();

    let client = spawn(move || {
        let mut client = Client::connect(addr);
        client.stream.write_all(b"GET / HTTP/1.1\r\nHost: local").unwrap();
        assert_eq!(client.read_head(), None);
    });

    match tick_until(&mut server, &mut router, |event| !matches!(event, TickEvent::Idle)) {
        TickEvent::HandshakeFailed(Error::Handshake(HandshakeError::ReadFailed(_))) => {}
        other => panic!("unexpected {other:?}"),
    }
    client.join().unwrap();
}

#[test]
fn busy_server_defers_second_peer() {
    init_test_logging();
    let mut server = local_server(Config::default());
    let addr = server.local_addr().unwrap();
    let mut router = Router::new();

    let first = spawn(move || Client::upgrade(addr, "dGhlIHNhbXBsZSBub25jZQ==").0);
    tick_until(&mut server, &mut router, |event| matches!(event, TickEvent::Connected(_)));
    let first = first.join().unwrap();

    let mut second = Client::connect(addr);
    second.stream.write_all(upgrade_request("x3JJHMbDL1EzLkh9GBhXDw==").as_bytes()).unwrap();
    second.stream.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
    for _ in 0..10 {
        assert!(matches!(server.tick(&mut router), TickEvent::Pumped));
    }
    let mut byte = [0u8; 1];
    assert!(second.stream.read(&mut byte).is_err(), "second peer must wait in the backlog");

    drop(first);
    tick_until(&mut server, &mut router, |event| matches!(event, TickEvent::Disconnected));
    second.stream.set_read_timeout(Some(common::TIMEOUT)).unwrap();
    let second = spawn(move || second.read_head().unwrap());
    tick_until(&mut server, &mut router, |event| matches!(event, TickEvent::Connected(_)));
    assert!(second.join().unwrap().contains("HSmrc0sMlYUkAGmm5OPpG2HaGWk="));
}

#[test]
fn busy_server_rejects_second_peer() {
    init_test_logging();
    let mut server = local_server(Config::default().busy_policy(BusyPolicy::Reject));
    let addr = server.local_addr().unwrap();
    let mut router = Router::new();

    let first = spawn(move || Client::upgrade(addr, "dGhlIHNhbXBsZSBub25jZQ==").0);
    tick_until(&mut server, &mut router, |event| matches!(event, TickEvent::Connected(_)));
    let _first = first.join().unwrap();

    let mut second = Client::connect(addr);
    second.stream.write_all(upgrade_request("x3JJHMbDL1EzLkh9GBhXDw==").as_bytes()).unwrap();
    sleep(Duration::from_millis(20));
    for _ in 0..5 {
        assert!(matches!(server.tick(&mut router), TickEvent::Pumped));
    }
    assert_eq!(second.read_head(), None);
    assert_eq!(server.state(), SessionState::Connected);
}

#[test]
fn busy_server_serves_peer_waiting_when_session_ends() {
    init_test_logging();
    let mut server = local_server(Config::default().busy_policy(BusyPolicy::Reject));
    let addr = server.local_addr().unwrap();
    let mut router = Router::new();

    let first = spawn(move || Client::upgrade(addr, "dGhlIHNhbXBsZSBub25jZQ==").0);
    tick_until(&mut server, &mut router, |event| matches!(event, TickEvent::Connected(_)));
    let mut first = first.join().unwrap();

    // The second peer queues up in the same tick that ends the first session.
    let mut second = Client::connect(addr);
    second.stream.write_all(upgrade_request("x3JJHMbDL1EzLkh9GBhXDw==").as_bytes()).unwrap();
    first.send(Frame::close(None));
    sleep(Duration::from_millis(20));
    assert!(matches!(server.tick(&mut router), TickEvent::Disconnected));

    let second = spawn(move || second.read_head());
    tick_until(&mut server, &mut router, |event| matches!(event, TickEvent::Connected(_)));
    assert!(second.join().unwrap().unwrap().contains("HSmrc0sMlYUkAGmm5OPpG2HaGWk="));
    assert_eq!(server.state(), SessionState::Connected);
}
