//! A buffer for reading data from the network.
//!
//! The `ReadBuffer` is a FIFO of bytes. It is filled by reading from a stream
//! supporting `Read` and drained through its cursor, either by the handshake executor
//! (looking for the end of the request headers) or by the frame codec.

use std::io::{Cursor, Read, Result as IoResult};

use bytes::Buf;

/// A FIFO buffer for reading packets from the network.
#[derive(Debug)]
pub struct ReadBuffer<const CHUNK_SIZE: usize> {
    storage: Cursor<Vec<u8>>,
    chunk: Box<[u8; CHUNK_SIZE]>,
}

impl<const CHUNK_SIZE: usize> ReadBuffer<CHUNK_SIZE> {
    /// Create a new empty input buffer.
    pub fn new() -> Self {
        Self::with_capacity(CHUNK_SIZE)
    }

    /// Create a new empty input buffer with a given `capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_partially_read(Vec::with_capacity(capacity))
    }

    /// Create an input buffer filled with previously read data.
    pub fn from_partially_read(part: Vec<u8>) -> Self {
        Self { storage: Cursor::new(part), chunk: Box::new([0; CHUNK_SIZE]) }
    }

    /// Consume the `ReadBuffer` and get the unread part of the storage.
    pub fn into_vec(mut self) -> Vec<u8> {
        self.clean_up();
        self.storage.into_inner()
    }

    /// Read next portion of data from the given input stream.
    pub fn read_from<S: Read>(&mut self, stream: &mut S) -> IoResult<usize> {
        self.read_at_most(stream, CHUNK_SIZE)
    }

    /// Read at most `limit` bytes from the given input stream.
    ///
    /// A `limit` of zero performs no read and returns `Ok(0)`.
    pub fn read_at_most<S: Read>(&mut self, stream: &mut S, limit: usize) -> IoResult<usize> {
        let limit = limit.min(CHUNK_SIZE);
        if limit == 0 {
            return Ok(0);
        }
        self.clean_up();
        let size = stream.read(&mut self.chunk[..limit])?;
        self.storage.get_mut().extend_from_slice(&self.chunk[..size]);
        Ok(size)
    }

    /// Position of the first occurrence of `needle` in the unread data, relative to
    /// the start of the unread data.
    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        self.find_from(needle, 0)
    }

    /// Like [`Self::find`] but skips matches starting before `from`.
    pub fn find_from(&self, needle: &[u8], from: usize) -> Option<usize> {
        let data = self.chunk_ref();
        if from > data.len() {
            return None;
        }
        if needle.is_empty() {
            return Some(from);
        }
        data[from..].windows(needle.len()).position(|window| window == needle).map(|pos| pos + from)
    }

    /// Cleans up the part of the vector that has been already read by the cursor.
    fn clean_up(&mut self) {
        let pos = self.storage.position() as usize;
        self.storage.get_mut().drain(0..pos);
        self.storage.set_position(0);
    }

    fn chunk_ref(&self) -> &[u8] {
        Buf::chunk(&self.storage)
    }
}

impl<const CHUNK_SIZE: usize> Buf for ReadBuffer<CHUNK_SIZE> {
    fn remaining(&self) -> usize {
        Buf::remaining(&self.storage)
    }

    fn chunk(&self) -> &[u8] {
        self.chunk_ref()
    }

    fn advance(&mut self, cnt: usize) {
        Buf::advance(&mut self.storage, cnt);
    }
}

impl<const CHUNK_SIZE: usize> Default for ReadBuffer<CHUNK_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}
