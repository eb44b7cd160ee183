//! A minimal blocking WebSocket client and server-driving helpers for loopback tests.

#![allow(dead_code)]

use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpStream},
    thread::sleep,
    time::{Duration, Instant},
};

use tickws::{
    protocol::frame::{coding::OpCode, Frame, FrameHeader},
    Config, Router, Server, TickEvent,
};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_test_logging() {
    env_logger::try_init().ok();
}

/// A server bound to an ephemeral loopback port.
pub fn local_server(config: Config) -> Server {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    Server::bind(config.listen_addr(addr)).expect("Can't listen on loopback")
}

/// Tick until `done` accepts an event, sleeping briefly while idle.
pub fn tick_until(server: &mut Server, router: &mut Router, mut done: impl FnMut(&TickEvent) -> bool) -> TickEvent {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let event = server.tick(router);
        if done(&event) {
            return event;
        }
        assert!(Instant::now() < deadline, "server never reached the expected event, last: {event:?}");
        if let TickEvent::Idle = event {
            sleep(Duration::from_millis(1));
        }
    }
}

pub fn upgrade_request(key: &str) -> String {
    format!(
        "GET /chat HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    )
}

/// Blocking test client. Masks everything it sends.
pub struct Client {
    pub stream: TcpStream,
    buffer: Vec<u8>,
}

impl Client {
    pub fn connect(addr: SocketAddr) -> Client {
        let stream = TcpStream::connect(addr).expect("Can't connect");
        stream.set_read_timeout(Some(TIMEOUT)).unwrap();
        Client { stream, buffer: Vec::new() }
    }

    /// Connect and upgrade with `key`. Returns the client and the response head.
    pub fn upgrade(addr: SocketAddr, key: &str) -> (Client, String) {
        let mut client = Client::connect(addr);
        client.stream.write_all(upgrade_request(key).as_bytes()).unwrap();
        let head = client.read_head().expect("no response head");
        (client, head)
    }

    /// Read up to and including the blank line ending an HTTP head.
    pub fn read_head(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = self.buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                let head: Vec<u8> = self.buffer.drain(..pos + 4).collect();
                return Some(String::from_utf8(head).unwrap());
            }
            if !self.fill() {
                return None;
            }
        }
    }

    pub fn send(&mut self, mut frame: Frame) {
        frame.set_mask(rand::random());
        let mut raw = Vec::new();
        frame.format(&mut raw);
        self.stream.write_all(&raw).unwrap();
    }

    /// The next frame from the server, or `None` once the server closed the connection.
    pub fn read_frame(&mut self) -> Option<(OpCode, Vec<u8>)> {
        loop {
            if let Some((header, length, header_len)) = FrameHeader::parse(&self.buffer).unwrap() {
                let end = header_len + length as usize;
                if self.buffer.len() >= end {
                    assert!(header.mask.is_none(), "server frames are never masked");
                    let payload = self.buffer[header_len..end].to_vec();
                    self.buffer.drain(..end);
                    return Some((header.opcode, payload));
                }
            }
            if !self.fill() {
                return None;
            }
        }
    }

    /// Read more bytes; false on EOF or reset.
    fn fill(&mut self) -> bool {
        let mut chunk = [0u8; 4096];
        match self.stream.read(&mut chunk) {
            Ok(0) => false,
            Ok(size) => {
                self.buffer.extend_from_slice(&chunk[..size]);
                true
            }
            Err(err) if err.kind() == std::io::ErrorKind::ConnectionReset => false,
            Err(err) => panic!("client read failed: {err}"),
        }
    }
}
