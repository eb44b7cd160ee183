//! Utilities to work with raw WebSocket frames.

pub mod coding;

#[allow(clippy::module_inception)]
mod frame;
mod mask;

pub use self::{
    frame::{Frame, FrameHeader},
    mask::apply_mask,
};

use bytes::Buf;
use log::trace;

use crate::{
    error::{CapacityError, Result},
    ReadBuffer,
};

/// Incremental frame decoder over a [`ReadBuffer`].
///
/// Keeps a parsed header between calls so a frame may arrive in any number of reads.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Header and payload length of the frame currently being received.
    header: Option<(FrameHeader, u64)>,
}

impl FrameDecoder {
    /// Create a decoder that is waiting for a frame header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next complete frame out of `buffer`, if it holds one.
    ///
    /// The payload is unmasked. A frame whose declared length exceeds `max_frame_size`
    /// is rejected as soon as its header is known.
    pub fn decode(&mut self, buffer: &mut ReadBuffer, max_frame_size: Option<usize>) -> Result<Option<Frame>> {
        let max_size = max_frame_size.unwrap_or(usize::MAX);

        if self.header.is_none() {
            let Some((header, length, header_len)) = FrameHeader::parse(buffer.chunk())? else {
                return Ok(None);
            };
            if length > max_size as u64 {
                return Err(CapacityError::FrameTooLong { size: length, max_size }.into());
            }
            buffer.advance(header_len);
            self.header = Some((header, length));
        }

        match self.header {
            Some((_, length)) if (length as usize) <= buffer.remaining() => {}
            _ => return Ok(None),
        }

        let Some((header, length)) = self.header.take() else {
            return Ok(None);
        };
        let length = length as usize;
        let payload = buffer.chunk()[..length].to_vec();
        buffer.advance(length);

        let frame = Frame::from_payload(header, payload);
        trace!("received frame {frame}");
        Ok(Some(frame))
    }

    /// Whether a frame header has been parsed but its payload is still incomplete.
    pub fn is_mid_frame(&self) -> bool {
        self.header.is_some()
    }
}
