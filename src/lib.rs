//! Single-peer WebSocket server engine for applications that own their run loop.
//!
//! The engine is split into two phases. A short, bounded-blocking handshake
//! ([`handshake::server::accept_upgrade`]) upgrades a freshly accepted TCP connection,
//! after which a [`Session`] is driven strictly non-blocking by calling
//! [`Session::pump`] once per tick of the outer loop.
//!
//! ```no_run
//! use tickws::{Config, Message, Outbox, Router, Server};
//!
//! let mut server = Server::bind(Config::default())?;
//! let mut router = Router::new();
//! router.on_text(|msg: &Message<'_>, _: &mut Outbox| {
//!     println!("text received: {}", msg.text_lossy());
//! });
//!
//! loop {
//!     server.tick(&mut router);
//!     // ... render a frame, sleep until the next tick ...
//! #   break;
//! }
//! # Ok::<(), std::io::Error>(())
//! ```
#![deny(
    missing_docs,
    missing_copy_implementations,
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_must_use,
    unused_mut,
    unused_imports,
    unused_import_braces
)]

pub use http;

pub mod buffer;
pub mod config;
pub mod error;
pub mod handshake;
pub mod protocol;
pub mod router;
pub mod server;
pub mod session;
pub mod stream;

const READ_BUFFER_CHUNK_SIZE: usize = 4096;
type ReadBuffer = buffer::ReadBuffer<READ_BUFFER_CHUNK_SIZE>;

pub use crate::{
    config::{BusyPolicy, Config},
    error::{Error, HandshakeError, Result},
    handshake::derive_accept_key,
    protocol::{Message, OutboundMessage},
    router::{Dispatch, Handler, Outbox, Router},
    server::{Server, TickEvent},
    session::{Outcome, Session, SessionState},
    stream::{TcpTransport, Transport},
};
