//! A live WebSocket session and its transport pump.

use std::{
    io::ErrorKind,
    net::TcpStream,
    time::{Duration, Instant},
};

use bytes::Bytes;
use log::{debug, info, trace, warn};

use crate::{
    config::Config,
    error::{Error, HandshakeError, Result, TransportError},
    handshake::server::accept_upgrade,
    protocol::{FrameCodec, Message, OutboundMessage, Step},
    router::{Outbox, Router},
    stream::{prepare_handshake, Interest, Readiness, TcpTransport, Transport},
};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The upgrade handshake is running. The handshake completes within a single
    /// [`Server::tick`](crate::Server::tick), so no caller observes this state; a
    /// [`Session`] starts out [`SessionState::Connected`].
    Handshaking,
    /// Messages flow in both directions.
    Connected,
    /// A close frame was sent or received and the exchange is being flushed.
    Closing,
    /// The transport is closed. Terminal.
    Closed,
}

/// Result of a successful [`Session::pump`] call.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The session is still live; pump again on the next tick.
    Continue,
    /// The peer went away or the closing handshake completed. The session is closed.
    Disconnected,
}

/// Everything released on teardown.
#[derive(Debug)]
struct Live<T> {
    transport: T,
    codec: FrameCodec,
    /// Cleared on peer EOF and once the peer's close frame is consumed.
    valid: bool,
}

/// A WebSocket session over an upgraded transport.
///
/// The session never blocks: [`Session::pump`] waits at most
/// [`Config::poll_timeout`] per call. Once it returns an error or
/// [`Outcome::Disconnected`], the session is [`SessionState::Closed`] and every
/// further call returns [`Error::AlreadyClosed`].
#[derive(Debug)]
pub struct Session<T: Transport = TcpTransport> {
    live: Option<Live<T>>,
    config: Config,
}

impl Session<TcpTransport> {
    /// Run the upgrade handshake on a freshly accepted connection and start a session.
    ///
    /// The connection blocks (bounded by [`Config::handshake_timeout`]) during the
    /// handshake and is switched to non-blocking mode afterwards. On error the
    /// connection is closed.
    pub fn accept(stream: TcpStream, config: &Config) -> Result<Self> {
        prepare_handshake(&stream, config.handshake_timeout).map_err(HandshakeError::ReadFailed)?;
        let upgraded = accept_upgrade(stream, config)?;
        let transport = TcpTransport::new(upgraded.stream).map_err(TransportError::PollFailed)?;
        Ok(Session::new(transport, upgraded.leftover, config))
    }
}

impl<T: Transport> Session<T> {
    /// Start a session over an already upgraded transport.
    ///
    /// `leftover` holds bytes received after the handshake request; they are decoded
    /// on the first pump.
    pub fn new(transport: T, leftover: Vec<u8>, config: &Config) -> Self {
        let codec = FrameCodec::from_partially_read(leftover, config);
        Session { live: Some(Live { transport, codec, valid: true }), config: *config }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        match &self.live {
            None => SessionState::Closed,
            Some(live) if live.codec.is_closing() => SessionState::Closing,
            Some(_) => SessionState::Connected,
        }
    }

    /// Returns a shared reference to the transport, unless the session is closed.
    pub fn get_ref(&self) -> Option<&T> {
        self.live.as_ref().map(|live| &live.transport)
    }

    /// Queue a text message. It is written by later pumps.
    pub fn send_text(&mut self, text: impl Into<Bytes>) -> Result<()> {
        self.send(OutboundMessage::text(text))
    }

    /// Queue a binary message. It is written by later pumps.
    pub fn send_binary(&mut self, data: impl Into<Bytes>) -> Result<()> {
        self.send(OutboundMessage::binary(data))
    }

    /// Queue a message. It is written by later pumps.
    pub fn send(&mut self, message: OutboundMessage) -> Result<()> {
        let live = self.live.as_mut().ok_or(Error::AlreadyClosed)?;
        live.codec.queue(message)
    }

    /// Start the closing handshake.
    ///
    /// Later pumps flush the close frame and report [`Outcome::Disconnected`] once the
    /// peer answers. Calling it again while closing does nothing.
    pub fn close(&mut self) -> Result<()> {
        let live = self.live.as_mut().ok_or(Error::AlreadyClosed)?;
        live.codec.close();
        Ok(())
    }

    /// Close the transport and release the codec. Idempotent.
    pub fn teardown(&mut self) {
        if let Some(mut live) = self.live.take() {
            if let Err(err) = live.transport.shutdown() {
                debug!("Shutdown failed: {err}");
            }
            info!("Session closed");
        }
    }

    /// Drive the session for at most [`Config::poll_timeout`].
    ///
    /// Reads and dispatches inbound messages to `router`, in stream order, and writes
    /// queued output. Replies the handlers put in their [`Outbox`] are queued after
    /// the dispatch. Any error tears the session down before it is returned.
    pub fn pump(&mut self, router: &mut Router) -> Result<Outcome> {
        let deadline = Instant::now() + self.config.poll_timeout;
        let live = self.live.as_mut().ok_or(Error::AlreadyClosed)?;
        match live.pump_until(router, deadline) {
            Ok(Outcome::Continue) => Ok(Outcome::Continue),
            Ok(Outcome::Disconnected) => {
                info!("Peer disconnected");
                self.teardown();
                Ok(Outcome::Disconnected)
            }
            Err(err) => {
                warn!("Session failed: {err}");
                self.teardown();
                Err(err)
            }
        }
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<T: Transport> Live<T> {
    fn pump_until(&mut self, router: &mut Router, deadline: Instant) -> Result<Outcome> {
        self.dispatch(router, |codec, _, sink| codec.decode_buffered(sink).map(|()| Step::Progress))?;

        loop {
            if !self.valid || self.codec.close_received() {
                self.flush_best_effort();
                return Ok(Outcome::Disconnected);
            }

            let interest = Interest { read: self.codec.want_read(), write: self.codec.want_write() };
            if interest.is_empty() {
                return Ok(Outcome::Continue);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let readiness = match self.transport.poll_ready(interest, remaining) {
                Ok(readiness) => readiness,
                Err(err) if err.kind() == ErrorKind::Interrupted => Readiness::default(),
                Err(err) => return Err(TransportError::PollFailed(err).into()),
            };
            if readiness.is_idle() {
                return Ok(Outcome::Continue);
            }

            let mut progressed = false;
            if readiness.readable && interest.read {
                match self.dispatch(router, |codec, transport, sink| codec.recv(transport, sink))? {
                    Step::Eof => {
                        self.valid = false;
                        continue;
                    }
                    Step::Progress => progressed = true,
                    Step::WouldBlock => {}
                }
            }
            if readiness.writable && self.codec.want_write() {
                progressed |= self.codec.send(&mut self.transport)? == Step::Progress;
            }

            if readiness.error || (readiness.hangup && !progressed && !self.codec.close_received()) {
                return Err(TransportError::PeerReset.into());
            }
            if remaining == Duration::ZERO {
                return Ok(Outcome::Continue);
            }
        }
    }

    /// Run a receive step, dispatching each decoded message to `router`.
    fn dispatch<F>(&mut self, router: &mut Router, step: F) -> Result<Step>
    where
        F: FnOnce(&mut FrameCodec, &mut T, &mut dyn FnMut(Message<'_>, &mut Outbox)) -> Result<Step>,
    {
        step(&mut self.codec, &mut self.transport, &mut |message: Message<'_>, outbox: &mut Outbox| {
            trace!("Dispatching {} byte message", message.len());
            router.dispatch(&message, outbox);
        })
    }

    /// Push out what can be written without blocking. Errors are ignored.
    fn flush_best_effort(&mut self) {
        while self.codec.want_write() {
            match self.codec.send(&mut self.transport) {
                Ok(Step::Progress) => {}
                Ok(_) => break,
                Err(err) => {
                    debug!("Final flush failed: {err}");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::{Cell, RefCell},
        io::{self, Cursor, Read, Write},
        rc::Rc,
    };

    use super::*;
    use crate::{
        error::ProtocolError,
        protocol::frame::{
            coding::{CloseCode, Data, OpCode},
            Frame,
        },
    };

    /// Scripted transport: readable while input remains (or at EOF), always writable.
    #[derive(Debug, Default)]
    struct MockTransport {
        input: Cursor<Vec<u8>>,
        eof: bool,
        output: Rc<RefCell<Vec<u8>>>,
        shutdowns: Rc<Cell<usize>>,
        polls: Rc<Cell<usize>>,
        fail_poll: bool,
        hangup: bool,
    }

    impl MockTransport {
        fn new(input: Vec<u8>) -> Self {
            MockTransport { input: Cursor::new(input), ..MockTransport::default() }
        }

        fn has_input(&self) -> bool {
            (self.input.position() as usize) < self.input.get_ref().len()
        }
    }

    impl Read for MockTransport {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.input.read(buf)? {
                0 if !self.eof => Err(io::Error::from(ErrorKind::WouldBlock)),
                n => Ok(n),
            }
        }
    }

    impl Write for MockTransport {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for MockTransport {
        fn poll_ready(&mut self, interest: Interest, _: Duration) -> io::Result<Readiness> {
            self.polls.set(self.polls.get() + 1);
            if self.fail_poll {
                return Err(io::Error::from(ErrorKind::Other));
            }
            Ok(Readiness {
                readable: interest.read && (self.has_input() || self.eof),
                writable: interest.write,
                hangup: self.hangup,
                error: false,
            })
        }

        fn shutdown(&mut self) -> io::Result<()> {
            self.shutdowns.set(self.shutdowns.get() + 1);
            Ok(())
        }
    }

    fn client_frame(mut frame: Frame) -> Vec<u8> {
        frame.set_mask([0xA1, 0xB2, 0xC3, 0xD4]);
        let mut raw = Vec::new();
        frame.format(&mut raw);
        raw
    }

    fn text(payload: &str) -> Vec<u8> {
        client_frame(Frame::message(payload.to_owned(), OpCode::Data(Data::Text), true))
    }

    fn listing_router() -> Router {
        let mut router = Router::new();
        router.on_text_command("LISTAPPS", |_: &Message<'_>, outbox: &mut Outbox| outbox.text("app1"));
        router
    }

    fn assert_closed<T: Transport>(session: &mut Session<T>, router: &mut Router) {
        assert_eq!(session.state(), SessionState::Closed);
        for _ in 0..3 {
            assert!(matches!(session.pump(router), Err(Error::AlreadyClosed)));
            assert!(matches!(session.send_text("x"), Err(Error::AlreadyClosed)));
            assert!(matches!(session.send_binary(vec![1u8]), Err(Error::AlreadyClosed)));
            assert!(matches!(session.close(), Err(Error::AlreadyClosed)));
        }
    }

    #[test]
    fn replies_are_flushed_in_the_same_pump() {
        let transport = MockTransport::new(text("LISTAPPS"));
        let output = transport.output.clone();
        let mut session = Session::new(transport, Vec::new(), &Config::default());
        let mut router = listing_router();

        assert_eq!(session.pump(&mut router).unwrap(), Outcome::Continue);
        assert_eq!(*output.borrow(), b"\x81\x04app1");
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn queued_messages_are_written_in_order() {
        let transport = MockTransport::new(Vec::new());
        let output = transport.output.clone();
        let mut session = Session::new(transport, Vec::new(), &Config::default());
        session.send_text("meow!").unwrap();
        session.send_binary(vec![1u8, 2]).unwrap();

        assert_eq!(session.pump(&mut Router::new()).unwrap(), Outcome::Continue);
        assert_eq!(*output.borrow(), b"\x81\x05meow!\x82\x02\x01\x02");
    }

    #[test]
    fn leftover_is_decoded_without_readiness() {
        let transport = MockTransport::new(Vec::new());
        let output = transport.output.clone();
        let mut session = Session::new(transport, text("LISTAPPS"), &Config::default());
        let mut router = listing_router();

        assert_eq!(session.pump(&mut router).unwrap(), Outcome::Continue);
        assert_eq!(*output.borrow(), b"\x81\x04app1");
    }

    #[test]
    fn peer_close_disconnects() {
        let mut input = text("LISTAPPS");
        input.extend(client_frame(Frame::close(Some((CloseCode::Normal, "")))));
        let transport = MockTransport::new(input);
        let (output, shutdowns) = (transport.output.clone(), transport.shutdowns.clone());
        let mut session = Session::new(transport, Vec::new(), &Config::default());
        let mut router = listing_router();

        assert_eq!(session.pump(&mut router).unwrap(), Outcome::Disconnected);
        assert_eq!(*output.borrow(), b"\x81\x04app1\x88\x02\x03\xE8");
        assert_eq!(shutdowns.get(), 1);
        assert_closed(&mut session, &mut router);

        session.teardown();
        drop(session);
        assert_eq!(shutdowns.get(), 1);
    }

    #[test]
    fn graceful_close() {
        let transport = MockTransport::new(Vec::new());
        let output = transport.output.clone();
        let mut session = Session::new(transport, Vec::new(), &Config::default());
        let mut router = Router::new();

        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closing);
        assert!(matches!(session.send_text("late"), Err(Error::Protocol(ProtocolError::SendAfterClosing))));
        assert_eq!(session.pump(&mut router).unwrap(), Outcome::Continue);
        assert_eq!(*output.borrow(), vec![0x88, 0x02, 0x03, 0xE8]);
        assert_eq!(session.state(), SessionState::Closing);
    }

    #[test]
    fn eof_disconnects() {
        let mut transport = MockTransport::new(Vec::new());
        transport.eof = true;
        let shutdowns = transport.shutdowns.clone();
        let mut session = Session::new(transport, Vec::new(), &Config::default());
        let mut router = Router::new();

        assert_eq!(session.pump(&mut router).unwrap(), Outcome::Disconnected);
        assert_eq!(shutdowns.get(), 1);
        assert_closed(&mut session, &mut router);
    }

    #[test]
    fn poll_failure_tears_down() {
        let mut transport = MockTransport::new(Vec::new());
        transport.fail_poll = true;
        let shutdowns = transport.shutdowns.clone();
        let mut session = Session::new(transport, Vec::new(), &Config::default());
        let mut router = Router::new();

        assert!(matches!(session.pump(&mut router), Err(Error::Transport(TransportError::PollFailed(_)))));
        assert_eq!(shutdowns.get(), 1);
        assert_closed(&mut session, &mut router);
    }

    #[test]
    fn hangup_is_a_reset() {
        let mut transport = MockTransport::new(Vec::new());
        transport.hangup = true;
        let mut session = Session::new(transport, Vec::new(), &Config::default());
        let mut router = Router::new();

        assert!(matches!(session.pump(&mut router), Err(Error::Transport(TransportError::PeerReset))));
        assert_closed(&mut session, &mut router);
    }

    #[test]
    fn protocol_error_tears_down() {
        let mut unmasked = Vec::new();
        Frame::message("hi", OpCode::Data(Data::Text), true).format(&mut unmasked);
        let transport = MockTransport::new(unmasked);
        let shutdowns = transport.shutdowns.clone();
        let mut session = Session::new(transport, Vec::new(), &Config::default());
        let mut router = Router::new();

        assert!(matches!(
            session.pump(&mut router),
            Err(Error::Protocol(ProtocolError::UnmaskedFrameFromClient))
        ));
        assert_eq!(shutdowns.get(), 1);
        assert_closed(&mut session, &mut router);
    }

    #[test]
    fn idle_pump_polls_once() {
        let transport = MockTransport::new(Vec::new());
        let polls = transport.polls.clone();
        let mut session = Session::new(transport, Vec::new(), &Config::default());

        assert_eq!(session.pump(&mut Router::new()).unwrap(), Outcome::Continue);
        assert_eq!(polls.get(), 1);
    }

    #[test]
    fn drop_closes_transport() {
        let transport = MockTransport::new(Vec::new());
        let shutdowns = transport.shutdowns.clone();
        let session = Session::new(transport, Vec::new(), &Config::default());
        drop(session);
        assert_eq!(shutdowns.get(), 1);
    }
}
