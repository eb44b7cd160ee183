//! Server-side frame codec.
//!
//! The codec owns the receive and send buffers of a session. It turns bytes into
//! messages (reassembling fragments and answering control frames) and messages into
//! bytes, but never touches the socket on its own: the pump calls [`FrameCodec::recv`]
//! when the transport is readable and [`FrameCodec::send`] when it is writable, and
//! asks [`FrameCodec::want_read`] and [`FrameCodec::want_write`] what to poll for next.

use std::{
    collections::VecDeque,
    io::{self, ErrorKind, IoSlice, Read, Write},
};

use bytes::{Buf, Bytes};
use log::{debug, trace, warn};

use super::{
    frame::{
        coding::{CloseCode, Control, Data, OpCode},
        Frame, FrameDecoder,
    },
    message::{IncompleteMessage, IncompleteMessageType, Message, OutboundMessage},
};
use crate::{
    config::Config,
    error::{CapacityError, Error, ProtocolError, Result, TransportError},
    router::Outbox,
    ReadBuffer,
};

/// Queued frames are moved to the output chunks until they hold at least this many bytes.
const OUT_BUFFER_TARGET: usize = 128 * 1024;

/// Most chunks handed to a single vectored write.
const MAX_IO_SLICES: usize = 64;

/// Outcome of a single receive or send step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Bytes were moved.
    Progress,
    /// Nothing could be moved right now.
    WouldBlock,
    /// The peer closed its side of the connection.
    Eof,
}

/// The closing handshake as seen by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseState {
    /// Messages flow in both directions.
    Active,
    /// We queued a close frame and wait for the reply.
    ClosedByUs,
    /// The peer sent a close frame; our reply is queued.
    ClosedByPeer,
    /// We closed first and the peer replied.
    Acknowledged,
}

/// A WebSocket frame codec for the server role.
#[derive(Debug)]
pub struct FrameCodec {
    in_buffer: ReadBuffer,
    decoder: FrameDecoder,
    /// Send: frame headers and payloads not yet written, in wire order.
    out_chunks: VecDeque<Bytes>,
    /// Send: total length of `out_chunks`.
    out_len: usize,
    /// Send: data frames and close frames, in enqueue order.
    send_queue: VecDeque<Frame>,
    /// Send: an OOB pong message.
    pong: Option<Frame>,
    /// Receive: an incomplete message being processed.
    incomplete: Option<IncompleteMessage>,
    state: CloseState,
    /// A close frame has been formatted into the output buffer.
    close_sent: bool,
    config: Config,
}

impl FrameCodec {
    /// Create a codec for a freshly upgraded connection.
    pub fn new(config: &Config) -> Self {
        Self::from_partially_read(Vec::new(), config)
    }

    /// Create a codec whose receive buffer starts with bytes that were read during the
    /// handshake.
    pub fn from_partially_read(part: Vec<u8>, config: &Config) -> Self {
        FrameCodec {
            in_buffer: ReadBuffer::from_partially_read(part),
            decoder: FrameDecoder::new(),
            out_chunks: VecDeque::new(),
            out_len: 0,
            send_queue: VecDeque::new(),
            pong: None,
            incomplete: None,
            state: CloseState::Active,
            close_sent: false,
            config: *config,
        }
    }

    /// Whether the codec wants more input.
    ///
    /// False once the peer's close frame has been consumed.
    pub fn want_read(&self) -> bool {
        !self.close_received()
    }

    /// Whether the codec has output to flush.
    pub fn want_write(&self) -> bool {
        self.out_len > 0
            || (!self.close_sent && (self.pong.is_some() || !self.send_queue.is_empty()))
    }

    /// Whether the peer's close frame has been consumed. The connection is finished
    /// once the queued output is flushed.
    pub fn close_received(&self) -> bool {
        matches!(self.state, CloseState::ClosedByPeer | CloseState::Acknowledged)
    }

    /// Whether either side started the closing handshake.
    pub fn is_closing(&self) -> bool {
        self.state != CloseState::Active
    }

    /// Queue a data message behind everything queued before it.
    pub fn queue(&mut self, message: OutboundMessage) -> Result<()> {
        if self.is_closing() {
            return Err(Error::Protocol(ProtocolError::SendAfterClosing));
        }
        if let Some(max_size) = self.config.max_message_size {
            if message.len() > max_size {
                return Err(CapacityError::MessageTooLong { size: message.len(), max_size }.into());
            }
        }
        if let Some(max) = self.config.max_send_queue {
            if self.send_queue.len() >= max {
                return Err(Error::SendQueueFull);
            }
        }
        self.send_queue.push_back(message.into_frame());
        Ok(())
    }

    /// Start the closing handshake by queueing a close frame with code 1000.
    ///
    /// Does nothing if a close frame was already sent or received.
    pub fn close(&mut self) {
        if self.state == CloseState::Active {
            debug!("Closing connection");
            self.state = CloseState::ClosedByUs;
            self.send_queue.push_back(Frame::close(Some((CloseCode::Normal, ""))));
        }
    }

    /// Read once from `stream` and process every complete frame received.
    ///
    /// Each completed data message is passed to `sink`, in stream order. Replies the
    /// sink puts in the outbox are queued before the next message is decoded. Nothing
    /// is read if the peer's close frame was already consumed.
    pub fn recv<S, F>(&mut self, stream: &mut S, sink: F) -> Result<Step>
    where
        S: Read,
        F: FnMut(Message<'_>, &mut Outbox),
    {
        if self.close_received() {
            return Ok(Step::WouldBlock);
        }
        match self.in_buffer.read_from(stream) {
            Ok(0) => {
                debug!("Peer closed the connection");
                return Ok(Step::Eof);
            }
            Ok(size) => trace!("Read {size} bytes"),
            Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(Step::WouldBlock),
            Err(err) if err.kind() == ErrorKind::Interrupted => return Ok(Step::Progress),
            Err(err) => return Err(TransportError::ReadFailed(err).into()),
        }
        self.decode_buffered(sink)?;
        Ok(Step::Progress)
    }

    /// Process the frames already sitting in the receive buffer without reading.
    pub fn decode_buffered<F>(&mut self, mut sink: F) -> Result<()>
    where
        F: FnMut(Message<'_>, &mut Outbox),
    {
        while !self.close_received() {
            match self.decoder.decode(&mut self.in_buffer, self.config.max_frame_size)? {
                Some(frame) => self.handle_frame(frame, &mut sink)?,
                None => break,
            }
        }
        Ok(())
    }

    /// Write once to `stream`.
    ///
    /// Returns [`Step::WouldBlock`] when the stream is full or there is nothing to send.
    pub fn send<S: Write>(&mut self, stream: &mut S) -> Result<Step> {
        self.fill_out_chunks();
        if self.out_len == 0 {
            return Ok(Step::WouldBlock);
        }
        let written = {
            let slices: Vec<IoSlice<'_>> =
                self.out_chunks.iter().take(MAX_IO_SLICES).map(|chunk| IoSlice::new(chunk)).collect();
            stream.write_vectored(&slices)
        };
        match written {
            Ok(0) => Err(TransportError::WriteFailed(io::Error::new(
                ErrorKind::WriteZero,
                "Connection closed while writing",
            ))
            .into()),
            Ok(size) => {
                trace!("Wrote {size} of {} bytes", self.out_len);
                self.consume(size);
                Ok(Step::Progress)
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(Step::WouldBlock),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(Step::Progress),
            Err(err) => Err(TransportError::WriteFailed(err).into()),
        }
    }

    /// Drop `size` written bytes from the front of the output chunks.
    fn consume(&mut self, mut size: usize) {
        self.out_len = self.out_len.saturating_sub(size);
        while size > 0 {
            let Some(front) = self.out_chunks.front_mut() else {
                break;
            };
            if front.len() <= size {
                size -= front.len();
                self.out_chunks.pop_front();
            } else {
                front.advance(size);
                size = 0;
            }
        }
    }

    fn push_chunk(&mut self, chunk: Bytes) {
        if !chunk.is_empty() {
            self.out_len += chunk.len();
            self.out_chunks.push_back(chunk);
        }
    }

    /// Move queued frames to the output chunks. Nothing follows a close frame.
    fn fill_out_chunks(&mut self) {
        while !self.close_sent && self.out_len < OUT_BUFFER_TARGET {
            // Upon receipt of a Ping frame, an endpoint MUST send a Pong frame in
            // response, unless it already received a Close frame. It SHOULD
            // respond with Pong frame as soon as is practical. (RFC 6455)
            let Some(frame) = self.pong.take().or_else(|| self.send_queue.pop_front()) else {
                break;
            };
            let opcode = frame.header().opcode;
            trace!("Sending {opcode} frame ({} bytes)", frame.len());
            let (head, payload) = frame.into_wire();
            self.push_chunk(head);
            self.push_chunk(payload);
            if opcode == OpCode::Control(Control::Close) {
                self.close_sent = true;
                self.send_queue.clear();
            }
        }
    }

    /// Hand a message to the sink and queue its replies.
    fn deliver<F>(&mut self, message: Message<'_>, sink: &mut F)
    where
        F: FnMut(Message<'_>, &mut Outbox),
    {
        let mut outbox = Outbox::new();
        sink(message, &mut outbox);
        for reply in outbox.drain() {
            if let Err(err) = self.queue(reply) {
                warn!("Dropping reply: {err}");
            }
        }
    }

    fn handle_frame<F>(&mut self, frame: Frame, sink: &mut F) -> Result<()>
    where
        F: FnMut(Message<'_>, &mut Outbox),
    {
        let header = frame.header();
        let (is_final, opcode) = (header.is_final, header.opcode);

        // MUST be 0 unless an extension is negotiated that defines meanings
        // for non-zero values. (RFC 6455)
        if header.rsv1 || header.rsv2 || header.rsv3 {
            return Err(ProtocolError::NonZeroReservedBits.into());
        }

        // The server MUST close the connection upon receiving a
        // frame that is not masked. (RFC 6455)
        if !frame.is_masked() {
            return Err(ProtocolError::UnmaskedFrameFromClient.into());
        }

        match opcode {
            OpCode::Control(ctl) => {
                // All control frames MUST have a payload length of 125 bytes or less
                // and MUST NOT be fragmented. (RFC 6455)
                if !is_final {
                    return Err(ProtocolError::FragmentedControlFrame.into());
                }
                if frame.payload().len() > 125 {
                    return Err(ProtocolError::ControlFrameTooBig.into());
                }
                match ctl {
                    Control::Close => self.do_close(frame.into_close()?),
                    Control::Reserved(i) => return Err(ProtocolError::InvalidOpcode(i).into()),
                    Control::Ping | Control::Pong if self.is_closing() => {
                        trace!("Ignoring {ctl} while closing");
                    }
                    Control::Ping => {
                        // Only the most recent ping is answered.
                        self.pong = Some(Frame::pong(frame.into_payload()));
                    }
                    Control::Pong => trace!("Received pong"),
                }
                Ok(())
            }

            OpCode::Data(_) if self.is_closing() => {
                trace!("Dropping data frame received while closing");
                Ok(())
            }

            OpCode::Data(data) => match data {
                Data::Continue => {
                    let Some(msg) = self.incomplete.as_mut() else {
                        return Err(ProtocolError::UnexpectedContinueFrame.into());
                    };
                    msg.extend(frame.payload(), self.config.max_message_size)?;
                    if is_final {
                        if let Some(msg) = self.incomplete.take() {
                            self.deliver(msg.as_message(), sink);
                        }
                    }
                    Ok(())
                }
                c if self.incomplete.is_some() => Err(ProtocolError::ExpectedFragment(c).into()),
                Data::Text | Data::Binary => {
                    let kind = if data == Data::Text {
                        IncompleteMessageType::Text
                    } else {
                        IncompleteMessageType::Binary
                    };
                    if is_final {
                        let payload = frame.payload();
                        if let Some(max_size) = self.config.max_message_size {
                            if payload.len() > max_size {
                                return Err(CapacityError::MessageTooLong { size: payload.len(), max_size }.into());
                            }
                        }
                        let message = match kind {
                            IncompleteMessageType::Text => Message::Text(payload),
                            IncompleteMessageType::Binary => Message::Binary(payload),
                        };
                        self.deliver(message, sink);
                    } else {
                        let mut msg = IncompleteMessage::new(kind);
                        msg.extend(frame.payload(), self.config.max_message_size)?;
                        self.incomplete = Some(msg);
                    }
                    Ok(())
                }
                Data::Reserved(i) => Err(ProtocolError::InvalidOpcode(i).into()),
            },
        }
    }

    /// Received a close frame.
    fn do_close(&mut self, close: Option<(CloseCode, String)>) {
        debug!("Received close frame: {close:?}");
        match self.state {
            CloseState::Active => {
                self.state = CloseState::ClosedByPeer;
                let reply = match close {
                    Some((code, _)) if code.is_allowed() => Frame::close(Some((code, ""))),
                    Some(_) => Frame::close(Some((CloseCode::Protocol, "Protocol violation"))),
                    None => Frame::close(None),
                };
                self.send_queue.push_back(reply);
            }
            CloseState::ClosedByUs => self.state = CloseState::Acknowledged,
            CloseState::ClosedByPeer | CloseState::Acknowledged => {}
        }
    }
}
