use std::{borrow::Cow, fmt, str};

use bytes::Bytes;

use super::frame::{
    coding::{Data, OpCode},
    Frame,
};
use crate::error::{CapacityError, Result};

/// An inbound data message, borrowed from the codec for the duration of a handler call.
///
/// Control frames are answered by the codec and never show up here.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum Message<'a> {
    /// A text message. The payload is not checked for UTF-8 validity.
    Text(&'a [u8]),
    /// A binary message.
    Binary(&'a [u8]),
}

impl<'a> Message<'a> {
    /// Indicates whether a message is a text message.
    pub fn is_text(&self) -> bool {
        matches!(*self, Message::Text(_))
    }

    /// Indicates whether a message is a binary message.
    pub fn is_binary(&self) -> bool {
        matches!(*self, Message::Binary(_))
    }

    /// Get the length of the message payload.
    pub fn len(&self) -> usize {
        self.payload().len()
    }

    /// Returns true if the message has no content.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The raw payload.
    pub fn payload(&self) -> &'a [u8] {
        match *self {
            Message::Text(data) | Message::Binary(data) => data,
        }
    }

    /// The payload as a string, if it is valid UTF-8.
    pub fn to_text(&self) -> Option<&'a str> {
        str::from_utf8(self.payload()).ok()
    }

    /// The payload as a string with invalid sequences replaced.
    ///
    /// The view is bounded by the payload length; no terminator is looked for.
    pub fn text_lossy(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.payload())
    }
}

impl fmt::Display for Message<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Message::Text(_) => write!(f, "{}", self.text_lossy()),
            Message::Binary(data) => write!(f, "Binary Data<length={}>", data.len()),
        }
    }
}

/// A data message waiting in the send queue.
#[derive(Debug, Eq, PartialEq, Clone)]
pub enum OutboundMessage {
    /// A text message.
    Text(Bytes),
    /// A binary message.
    Binary(Bytes),
}

impl OutboundMessage {
    /// Create a new text message.
    pub fn text<S>(string: S) -> OutboundMessage
    where
        S: Into<Bytes>,
    {
        OutboundMessage::Text(string.into())
    }

    /// Create a new binary message.
    pub fn binary<B>(bin: B) -> OutboundMessage
    where
        B: Into<Bytes>,
    {
        OutboundMessage::Binary(bin.into())
    }

    /// Get the length of the message payload.
    pub fn len(&self) -> usize {
        self.payload().len()
    }

    /// Returns true if the message has no content.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The payload.
    pub fn payload(&self) -> &Bytes {
        match self {
            OutboundMessage::Text(data) | OutboundMessage::Binary(data) => data,
        }
    }

    /// Build the single final frame carrying this message.
    pub(crate) fn into_frame(self) -> Frame {
        match self {
            OutboundMessage::Text(data) => Frame::message(data, OpCode::Data(Data::Text), true),
            OutboundMessage::Binary(data) => Frame::message(data, OpCode::Data(Data::Binary), true),
        }
    }
}

/// A message being reassembled from fragments.
#[derive(Debug)]
pub(crate) struct IncompleteMessage {
    kind: IncompleteMessageType,
    data: Vec<u8>,
}

/// The type of incomplete message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IncompleteMessageType {
    Text,
    Binary,
}

impl IncompleteMessage {
    /// Create new.
    pub fn new(kind: IncompleteMessageType) -> Self {
        IncompleteMessage { kind, data: Vec::new() }
    }

    /// Get the current filled size of the buffer.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Add more data to an existing message.
    pub fn extend(&mut self, tail: &[u8], size_limit: Option<usize>) -> Result<()> {
        // Always have a max size. This ensures an error in case of concatenating two buffers
        // of more than `usize::max_value()` bytes in total.
        let max_size = size_limit.unwrap_or(usize::MAX);
        let my_size = self.len();
        let portion_size = tail.len();
        // Be careful about integer overflows here.
        if my_size > max_size || portion_size > max_size - my_size {
            return Err(CapacityError::MessageTooLong { size: my_size + portion_size, max_size }.into());
        }
        self.data.extend_from_slice(tail);
        Ok(())
    }

    /// Borrow the completed message.
    pub fn as_message(&self) -> Message<'_> {
        match self.kind {
            IncompleteMessageType::Text => Message::Text(&self.data),
            IncompleteMessageType::Binary => Message::Binary(&self.data),
        }
    }
}
