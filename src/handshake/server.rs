//! Server handshake: the bounded-blocking setup phase.

use std::io::{ErrorKind, Read, Write};

use bytes::Buf;
use log::{debug, trace};

use super::{derive_accept_key, switching_protocols, HandshakeRequest, HEADER_TERMINATOR};
use crate::{config::Config, error::HandshakeError, ReadBuffer};

/// A connection whose upgrade completed.
#[derive(Debug)]
pub struct Upgraded<S> {
    /// The connection, positioned right after the request head.
    pub stream: S,
    /// The request the peer sent.
    pub request: HandshakeRequest,
    /// The `Sec-WebSocket-Accept` value that was sent back.
    pub accept_key: String,
    /// Bytes the peer sent after its request head, usually the start of its first
    /// frame. They belong to the frame codec.
    pub leftover: Vec<u8>,
}

/// Perform the upgrade over a freshly accepted connection.
///
/// Reads the request head, validates it, and writes the `101 Switching Protocols`
/// response. The stream is expected to block; this is the only engine operation that
/// does. Reading stops at the blank line ending the head, at EOF, or once
/// `config.max_header_size` bytes arrived without one.
///
/// On error the caller must close the connection without creating a session.
pub fn accept_upgrade<S: Read + Write>(
    mut stream: S,
    config: &Config,
) -> Result<Upgraded<S>, HandshakeError> {
    debug!("Performing server handshake...");
    let mut buffer = ReadBuffer::new();
    let head_len = read_request_head(&mut stream, &mut buffer, config.max_header_size)?;

    let request = HandshakeRequest::parse(&buffer.chunk()[..head_len])?;
    let accept_key = derive_accept_key(request.validate()?);
    buffer.advance(head_len);

    stream
        .write_all(switching_protocols(&accept_key).as_bytes())
        .and_then(|()| stream.flush())
        .map_err(HandshakeError::WriteFailed)?;

    let leftover = buffer.into_vec();
    debug!("Server handshake done ({} bytes of frame data already received).", leftover.len());
    Ok(Upgraded { stream, request, accept_key, leftover })
}

/// Fill `buffer` until it holds a complete request head and return the head's length.
fn read_request_head<S: Read>(
    stream: &mut S,
    buffer: &mut ReadBuffer,
    max_header_size: usize,
) -> Result<usize, HandshakeError> {
    let mut scanned = 0;
    loop {
        if let Some(pos) = buffer.find_from(HEADER_TERMINATOR, scanned) {
            return Ok(pos + HEADER_TERMINATOR.len());
        }
        // A terminator may straddle the next read.
        scanned = buffer.remaining().saturating_sub(HEADER_TERMINATOR.len() - 1);

        let budget = max_header_size.saturating_sub(buffer.remaining());
        if budget == 0 {
            return Err(HandshakeError::HeaderTooLarge(max_header_size));
        }
        match buffer.read_at_most(stream, budget) {
            Ok(0) => return Err(HandshakeError::UnexpectedEof),
            Ok(size) => trace!("Read {size} bytes of request head"),
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(HandshakeError::ReadFailed(err)),
        }
    }
}
