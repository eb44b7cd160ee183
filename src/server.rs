//! Listener glue: accepts one peer at a time and drives its session once per tick.

use std::{
    io::{self, ErrorKind},
    net::{SocketAddr, TcpListener},
};

use log::{debug, info, warn};

use crate::{
    config::{BusyPolicy, Config},
    error::Error,
    router::Router,
    session::{Outcome, Session, SessionState},
};

/// What happened during one [`Server::tick`].
#[derive(Debug)]
pub enum TickEvent {
    /// No session and no pending connection.
    Idle,
    /// A peer completed the handshake; its session is now live.
    Connected(SocketAddr),
    /// A connection attempt failed during the handshake and was closed.
    HandshakeFailed(Error),
    /// The live session was pumped and is still live.
    Pumped,
    /// The live session ended normally.
    Disconnected,
    /// The live session failed and was torn down.
    Failed(Error),
}

/// A non-blocking listener owning at most one [`Session`].
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    session: Option<Session>,
    config: Config,
}

impl Server {
    /// Bind a non-blocking listener to [`Config::listen_addr`].
    pub fn bind(config: Config) -> io::Result<Self> {
        let listener = TcpListener::bind(config.listen_addr)?;
        listener.set_nonblocking(true)?;
        info!("Listening on {}", listener.local_addr()?);
        Ok(Server { listener, session: None, config })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// State of the current session, [`SessionState::Closed`] when there is none.
    ///
    /// The handshake runs to completion inside [`Server::tick`], so
    /// [`SessionState::Handshaking`] is never seen here.
    pub fn state(&self) -> SessionState {
        self.session.as_ref().map_or(SessionState::Closed, |session| session.state())
    }

    /// The live session, if any.
    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    /// Tear down the live session, if any. The next tick accepts again.
    pub fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.teardown();
        }
    }

    /// Advance the server by one step of the outer loop.
    ///
    /// Without a session, accepts at most one pending connection and performs its
    /// handshake (the only part that may block, bounded by
    /// [`Config::handshake_timeout`]). With a session, pumps it once.
    pub fn tick(&mut self, router: &mut Router) -> TickEvent {
        let Some(session) = self.session.as_mut() else {
            return self.accept_one();
        };

        let result = session.pump(router);
        let event = match result {
            Ok(Outcome::Continue) => TickEvent::Pumped,
            Ok(Outcome::Disconnected) => {
                self.session = None;
                TickEvent::Disconnected
            }
            Err(err) => {
                self.session = None;
                TickEvent::Failed(err)
            }
        };
        // Once the session is gone, waiting peers are served by the next tick.
        if self.config.busy_policy == BusyPolicy::Reject && self.session.is_some() {
            self.reject_pending();
        }
        event
    }

    fn accept_one(&mut self) -> TickEvent {
        let (stream, addr) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(err) if err.kind() == ErrorKind::WouldBlock => return TickEvent::Idle,
            Err(err) => {
                warn!("Accept failed: {err}");
                return TickEvent::Idle;
            }
        };

        debug!("Handshaking with {addr}");
        match Session::accept(stream, &self.config) {
            Ok(session) => {
                info!("Client connected ({addr})");
                self.session = Some(session);
                TickEvent::Connected(addr)
            }
            Err(err) => {
                warn!("Handshake with {addr} failed: {err}");
                TickEvent::HandshakeFailed(err)
            }
        }
    }

    /// Close every connection waiting in the backlog.
    fn reject_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    info!("Rejecting {addr}: a session is already live");
                    drop(stream);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!("Accept failed: {err}");
                    break;
                }
            }
        }
    }
}
