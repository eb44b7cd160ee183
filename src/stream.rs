//! Transports a session can be driven over.
//!
//! A [`Transport`] is a byte stream that can also wait, with a timeout, for the
//! readiness the session is interested in. [`TcpTransport`] implements it for a
//! non-blocking `TcpStream` with a one-source [`polling::Poller`].

use std::{
    fmt,
    io::{self, ErrorKind, IoSlice, Read, Result as IoResult, Write},
    net::{Shutdown, TcpStream},
    time::Duration,
};

use log::trace;
use polling::{Event, Events, Poller};

/// Readiness the session wants to be woken for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    /// Wake when the transport is readable.
    pub read: bool,
    /// Wake when the transport is writable.
    pub write: bool,
}

impl Interest {
    /// Whether nothing is wanted.
    pub fn is_empty(self) -> bool {
        !self.read && !self.write
    }
}

/// Readiness reported by [`Transport::poll_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    /// The transport can be read without blocking.
    pub readable: bool,
    /// The transport can be written without blocking.
    pub writable: bool,
    /// The connection was hung up.
    pub hangup: bool,
    /// The socket reported an error condition.
    pub error: bool,
}

impl Readiness {
    /// Whether the poll timed out without any event.
    pub fn is_idle(self) -> bool {
        !self.readable && !self.writable && !self.hangup && !self.error
    }
}

/// A non-blocking byte stream with readiness polling.
pub trait Transport: Read + Write {
    /// Wait at most `timeout` for the readiness named in `interest`.
    ///
    /// Returns an idle [`Readiness`] on timeout. Hang-up and error conditions are
    /// reported even if `interest` is empty.
    fn poll_ready(&mut self, interest: Interest, timeout: Duration) -> IoResult<Readiness>;

    /// Close the connection. Called at most once, when the session is torn down.
    fn shutdown(&mut self) -> IoResult<()>;
}

const KEY: usize = 0;

/// A TCP connection registered with its own poller.
pub struct TcpTransport {
    stream: TcpStream,
    poller: Poller,
    events: Events,
}

impl TcpTransport {
    /// Switch `stream` to non-blocking mode and register it for polling.
    pub fn new(stream: TcpStream) -> IoResult<Self> {
        stream.set_nonblocking(true)?;
        let poller = Poller::new()?;
        // SAFETY: the stream is owned by this transport and is deleted from the poller
        // in `Drop`, before the stream is closed.
        unsafe { poller.add(&stream, Event::none(KEY))? };
        Ok(TcpTransport { stream, poller, events: Events::new() })
    }

    /// Returns a shared reference to the inner stream.
    pub fn get_ref(&self) -> &TcpStream {
        &self.stream
    }
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TcpTransport").field("stream", &self.stream).finish_non_exhaustive()
    }
}

impl Read for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        self.stream.write(buf)
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> IoResult<usize> {
        self.stream.write_vectored(bufs)
    }

    fn flush(&mut self) -> IoResult<()> {
        self.stream.flush()
    }
}

impl Transport for TcpTransport {
    fn poll_ready(&mut self, interest: Interest, timeout: Duration) -> IoResult<Readiness> {
        let event = match (interest.read, interest.write) {
            (true, true) => Event::all(KEY),
            (true, false) => Event::readable(KEY),
            (false, true) => Event::writable(KEY),
            (false, false) => Event::none(KEY),
        };
        // Interest is oneshot; re-arm before every wait.
        self.poller.modify(&self.stream, event)?;

        self.events.clear();
        self.poller.wait(&mut self.events, Some(timeout))?;

        let mut readiness = Readiness::default();
        for event in self.events.iter().filter(|event| event.key == KEY) {
            readiness.readable |= event.readable;
            readiness.writable |= event.writable;
            readiness.hangup |= event.is_interrupt();
            readiness.error |= event.is_err().unwrap_or(false);
        }
        trace!("Polled {interest:?} -> {readiness:?}");
        Ok(readiness)
    }

    fn shutdown(&mut self) -> IoResult<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        let _ = self.poller.delete(&self.stream);
    }
}

/// Put a freshly accepted connection into blocking mode with `timeout` applied to
/// reads and writes, for the duration of the handshake.
pub fn prepare_handshake(stream: &TcpStream, timeout: Option<Duration>) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(timeout)?;
    stream.set_write_timeout(timeout)?;
    Ok(())
}
