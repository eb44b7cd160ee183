//! Engine configuration.

use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

/// The port the listener binds to unless told otherwise.
pub const DEFAULT_PORT: u16 = 5050;

/// What the [`Server`](crate::Server) does with connection attempts that arrive while a
/// session is already live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusyPolicy {
    /// Leave them in the kernel's accept backlog until the live session ends.
    #[default]
    Defer,
    /// Accept and immediately close them.
    Reject,
}

/// The configuration for the listener, the handshake and the session.
///
/// All fields are public; the builder-style setters are a convenience.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Address the listener binds to. Default `0.0.0.0:5050`.
    pub listen_addr: SocketAddr,
    /// Handshake header length ceiling in bytes, including the terminating blank line.
    /// Default 16 KiB.
    pub max_header_size: usize,
    /// Read/write timeout applied to the socket for the duration of the handshake.
    /// `None` lets a silent peer stall the handshake forever. Default 5 s.
    pub handshake_timeout: Option<Duration>,
    /// Upper bound of the time a single [`Session::pump`](crate::Session::pump) call
    /// may spend waiting for readiness. Default 10 ms.
    pub poll_timeout: Duration,
    /// Maximum size of a reassembled incoming message. `None` means no limit.
    /// Default 64 MiB.
    pub max_message_size: Option<usize>,
    /// Maximum payload size of a single incoming frame. `None` means no limit.
    /// Default 16 MiB.
    pub max_frame_size: Option<usize>,
    /// Maximum number of outbound messages waiting to be flushed. `None` means no
    /// limit. Default `None`.
    pub max_send_queue: Option<usize>,
    /// Handling of connection attempts while a session is live. Default
    /// [`BusyPolicy::Defer`].
    pub busy_policy: BusyPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_header_size: 16 << 10,
            handshake_timeout: Some(Duration::from_secs(5)),
            poll_timeout: Duration::from_millis(10),
            max_message_size: Some(64 << 20),
            max_frame_size: Some(16 << 20),
            max_send_queue: None,
            busy_policy: BusyPolicy::Defer,
        }
    }
}

impl Config {
    /// Set [`Self::listen_addr`].
    pub fn listen_addr(mut self, listen_addr: SocketAddr) -> Self {
        self.listen_addr = listen_addr;
        self
    }

    /// Set [`Self::max_header_size`].
    pub fn max_header_size(mut self, max_header_size: usize) -> Self {
        self.max_header_size = max_header_size;
        self
    }

    /// Set [`Self::handshake_timeout`].
    pub fn handshake_timeout(mut self, handshake_timeout: Option<Duration>) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    /// Set [`Self::poll_timeout`].
    pub fn poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Set [`Self::max_message_size`].
    pub fn max_message_size(mut self, max_message_size: Option<usize>) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Set [`Self::max_frame_size`].
    pub fn max_frame_size(mut self, max_frame_size: Option<usize>) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Set [`Self::max_send_queue`].
    pub fn max_send_queue(mut self, max_send_queue: Option<usize>) -> Self {
        self.max_send_queue = max_send_queue;
        self
    }

    /// Set [`Self::busy_policy`].
    pub fn busy_policy(mut self, busy_policy: BusyPolicy) -> Self {
        self.busy_policy = busy_policy;
        self
    }
}
