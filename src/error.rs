//! Error handling.

use std::{io, result};

use thiserror::Error;

use crate::protocol::frame::coding::Data;

/// Result type of all engine calls.
pub type Result<T, E = Error> = result::Result<T, E>;

/// Possible engine errors.
///
/// Every variant except [`Error::SendQueueFull`] is fatal to the session it was
/// returned from: the session has already been torn down when the caller sees it.
#[derive(Debug, Error)]
pub enum Error {
    /// Trying to work with a session that is already closed.
    ///
    /// Once a session reaches `Closed`, every enqueue and pump call returns this
    /// error, no matter how many times it is called.
    #[error("Trying to work with closed connection")]
    AlreadyClosed,
    /// The upgrade handshake failed.
    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    /// Socket-level failure while pumping the session.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    /// The peer violated the WebSocket framing protocol.
    #[error("WebSocket protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// - When reading: an incoming frame or message exceeds the configured limit.
    /// - When writing: the outgoing message exceeds the configured limit.
    #[error("Space limit exceeded: {0}")]
    Capacity(#[from] CapacityError),
    /// The outbound queue already holds `max_send_queue` messages.
    #[error("Send queue is full")]
    SendQueueFull,
}

/// Failures of the upgrade handshake.
///
/// Handshake errors are always fatal to the connection attempt; the caller closes the
/// raw socket and waits for the next peer.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// A required header (`Upgrade: websocket`, `Connection: Upgrade` or
    /// `Sec-WebSocket-Key`) is absent or does not carry the required token.
    #[error("Missing required header field: {0}")]
    MissingHeader(&'static str),
    /// `Sec-WebSocket-Key` is not a 24 byte value.
    #[error("Invalid value in Sec-WebSocket-Key (length {0}, expected 24)")]
    InvalidKey(usize),
    /// No `\r\n\r\n` within the configured header budget.
    #[error("Too large HTTP headers (limit {0} bytes)")]
    HeaderTooLarge(usize),
    /// The peer closed the connection before completing its request.
    #[error("Got EOF before the end of the request")]
    UnexpectedEof,
    /// Reading the request failed.
    #[error("Read failed: {0}")]
    ReadFailed(#[source] io::Error),
    /// Writing the `101 Switching Protocols` response failed.
    #[error("Write failed: {0}")]
    WriteFailed(#[source] io::Error),
    /// The request text is not HTTP.
    #[error("Malformed request: {0}")]
    Malformed(String),
}

impl From<httparse::Error> for HandshakeError {
    fn from(err: httparse::Error) -> Self {
        HandshakeError::Malformed(err.to_string())
    }
}

impl From<http::Error> for HandshakeError {
    fn from(err: http::Error) -> Self {
        HandshakeError::Malformed(err.to_string())
    }
}

/// Socket-level failures during the pump.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The readiness poll itself failed, or could not be set up.
    #[error("Poll failed: {0}")]
    PollFailed(#[source] io::Error),
    /// Reading from the socket failed.
    #[error("Read failed: {0}")]
    ReadFailed(#[source] io::Error),
    /// Writing to the socket failed.
    #[error("Write failed: {0}")]
    WriteFailed(#[source] io::Error),
    /// The socket reported an error or hang-up condition.
    #[error("Connection reset by peer")]
    PeerReset,
}

/// Indicates the specific type/cause of a framing protocol error.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Error)]
pub enum ProtocolError {
    /// The server must close the connection when an unmasked frame is received.
    #[error("Received an unmasked frame from client")]
    UnmaskedFrameFromClient,
    /// Reserved bits in frame header are non-zero.
    #[error("Reserved bits are non-zero")]
    NonZeroReservedBits,
    /// Control frames must not be fragmented.
    #[error("Fragmented control frame")]
    FragmentedControlFrame,
    /// Control frames must have a payload of 125 bytes or less.
    #[error("Control frame too big (payload must be 125 bytes or less)")]
    ControlFrameTooBig,
    /// Encountered a reserved opcode.
    #[error("Encountered invalid opcode: {0}")]
    InvalidOpcode(u8),
    /// Received a continue frame despite there being nothing to continue.
    #[error("Continue frame but nothing to continue")]
    UnexpectedContinueFrame,
    /// Received a new data frame while waiting for more fragments.
    #[error("While waiting for more fragments received: {0}")]
    ExpectedFragment(Data),
    /// The payload of a close frame is one byte long.
    #[error("Invalid close sequence")]
    InvalidCloseSequence,
    /// Not allowed to send after having sent a closing frame.
    #[error("Sending after closing is not allowed")]
    SendAfterClosing,
}

/// Indicates the specific type/cause of a capacity error.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Error)]
pub enum CapacityError {
    /// Message is bigger than the maximum allowed size.
    #[error("Message too long: {size} > {max_size}")]
    MessageTooLong {
        /// The size of the message.
        size: usize,
        /// The maximum allowed message size.
        max_size: usize,
    },
    /// A single frame is bigger than the maximum allowed size.
    #[error("Frame too long: {size} > {max_size}")]
    FrameTooLong {
        /// The declared payload length of the frame.
        size: u64,
        /// The maximum allowed frame payload size.
        max_size: usize,
    },
}
