use std::fmt;

use bytes::{BufMut, Bytes};

use super::{
    coding::{CloseCode, Control, OpCode},
    mask::apply_mask,
};
use crate::error::ProtocolError;

/// A struct representing a WebSocket frame header.
#[allow(missing_copy_implementations)]
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FrameHeader {
    /// Indicates that the frame is the last one of a possibly fragmented message.
    pub is_final: bool,
    /// Reserved for protocol extensions.
    pub rsv1: bool,
    /// Reserved for protocol extensions.
    pub rsv2: bool,
    /// Reserved for protocol extensions.
    pub rsv3: bool,
    /// WebSocket protocol opcode.
    pub opcode: OpCode,
    /// A frame mask, if any.
    pub mask: Option<[u8; 4]>,
}

impl Default for FrameHeader {
    fn default() -> Self {
        FrameHeader {
            is_final: true,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode: OpCode::Control(Control::Close),
            mask: None,
        }
    }
}

impl FrameHeader {
    /// Parse a header from the start of `data`.
    ///
    /// Returns the header, the payload length and the number of header bytes, or
    /// `None` if `data` does not hold a complete header yet.
    pub fn parse(data: &[u8]) -> Result<Option<(Self, u64, usize)>, ProtocolError> {
        let (first, second) = match data {
            [first, second, ..] => (*first, *second),
            _ => return Ok(None),
        };

        let is_final = first & 0x80 != 0;

        let rsv1 = first & 0x40 != 0;
        let rsv2 = first & 0x20 != 0;
        let rsv3 = first & 0x10 != 0;

        let opcode = OpCode::from(first & 0x0F);
        if opcode.is_reserved() {
            return Err(ProtocolError::InvalidOpcode(first & 0x0F));
        }

        let masked = second & 0x80 != 0;

        let length_format = LengthFormat::for_byte(second & 0x7F);
        let mut header_length = 2 + length_format.extra_bytes();
        let length = match length_format {
            LengthFormat::U8(length) => u64::from(length),
            LengthFormat::U16 => match data.get(2..4) {
                Some(bytes) => u64::from(u16::from_be_bytes([bytes[0], bytes[1]])),
                None => return Ok(None),
            },
            LengthFormat::U64 => match data.get(2..10) {
                Some(bytes) => {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(bytes);
                    u64::from_be_bytes(raw)
                }
                None => return Ok(None),
            },
        };

        let mask = if masked {
            let Some(bytes) = data.get(header_length..header_length + 4) else {
                return Ok(None);
            };
            header_length += 4;
            Some([bytes[0], bytes[1], bytes[2], bytes[3]])
        } else {
            None
        };

        let header = FrameHeader { is_final, rsv1, rsv2, rsv3, opcode, mask };
        Ok(Some((header, length, header_length)))
    }

    /// Get the size of the header formatted with given payload length.
    pub fn len(&self, length: u64) -> usize {
        2 + LengthFormat::for_length(length).extra_bytes() + if self.mask.is_some() { 4 } else { 0 }
    }

    /// Format a header for given payload size.
    pub fn format(&self, length: u64, output: &mut Vec<u8>) {
        let code: u8 = self.opcode.into();

        let one = {
            code | if self.is_final { 0x80 } else { 0 }
                | if self.rsv1 { 0x40 } else { 0 }
                | if self.rsv2 { 0x20 } else { 0 }
                | if self.rsv3 { 0x10 } else { 0 }
        };

        let lenfmt = LengthFormat::for_length(length);

        let two = { lenfmt.length_byte() | if self.mask.is_some() { 0x80 } else { 0 } };

        output.put_slice(&[one, two]);
        match lenfmt {
            LengthFormat::U8(_) => (),
            LengthFormat::U16 => output.put_u16(length as u16),
            LengthFormat::U64 => output.put_u64(length),
        }

        if let Some(ref mask) = self.mask {
            output.put_slice(mask);
        }
    }
}

/// A struct representing a WebSocket frame.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame {
    header: FrameHeader,
    payload: Bytes,
}

impl Frame {
    /// Get the length of the frame.
    /// This is the length of the header + the length of the payload.
    #[inline]
    pub fn len(&self) -> usize {
        let length = self.payload.len();
        self.header.len(length as u64) + length
    }

    /// Check if the frame is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a reference to the frame's header.
    #[inline]
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// Get a reference to the frame's payload.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Mask the payload with `mask` when the frame is formatted.
    ///
    /// Servers never mask; clients must.
    #[inline]
    pub fn set_mask(&mut self, mask: [u8; 4]) {
        self.header.mask = Some(mask);
    }

    /// Consume the frame into its payload.
    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Create a frame from a parsed header and its raw payload.
    ///
    /// The payload is unmasked; the header keeps the mask it arrived with, so the
    /// frame formats back to the bytes that were received.
    pub fn from_payload(header: FrameHeader, mut payload: Vec<u8>) -> Self {
        if let Some(mask) = header.mask {
            apply_mask(&mut payload, mask);
        }
        Frame { header, payload: payload.into() }
    }

    /// Whether the frame arrived masked (or will be masked when formatted).
    #[inline]
    pub fn is_masked(&self) -> bool {
        self.header.mask.is_some()
    }

    /// Consume the frame into a closing frame.
    pub fn into_close(self) -> Result<Option<(CloseCode, String)>, ProtocolError> {
        match self.payload.len() {
            0 => Ok(None),
            1 => Err(ProtocolError::InvalidCloseSequence),
            _ => {
                let code = u16::from_be_bytes([self.payload[0], self.payload[1]]).into();
                let reason = String::from_utf8_lossy(&self.payload[2..]).into_owned();
                Ok(Some((code, reason)))
            }
        }
    }

    /// Create a new data frame.
    #[inline]
    pub fn message(data: impl Into<Bytes>, opcode: OpCode, is_final: bool) -> Frame {
        debug_assert!(matches!(opcode, OpCode::Data(_)), "Invalid opcode for data frame.");
        Frame { header: FrameHeader { is_final, opcode, ..FrameHeader::default() }, payload: data.into() }
    }

    /// Create a new Pong control frame.
    #[inline]
    pub fn pong(data: impl Into<Bytes>) -> Frame {
        Frame {
            header: FrameHeader { opcode: OpCode::Control(Control::Pong), ..FrameHeader::default() },
            payload: data.into(),
        }
    }

    /// Create a new Ping control frame.
    #[inline]
    pub fn ping(data: impl Into<Bytes>) -> Frame {
        Frame {
            header: FrameHeader { opcode: OpCode::Control(Control::Ping), ..FrameHeader::default() },
            payload: data.into(),
        }
    }

    /// Create a new Close control frame.
    #[inline]
    pub fn close(msg: Option<(CloseCode, &str)>) -> Frame {
        let payload = if let Some((code, reason)) = msg {
            let mut p = Vec::with_capacity(reason.len() + 2);
            p.put_u16(code.into());
            p.put_slice(reason.as_bytes());
            p
        } else {
            Vec::new()
        };

        Frame { header: FrameHeader::default(), payload: payload.into() }
    }

    /// Split the frame into its formatted header and its payload, ready to be written.
    ///
    /// The payload is shared with the frame unless the frame is masked.
    pub fn into_wire(self) -> (Bytes, Bytes) {
        let mut head = Vec::with_capacity(14);
        self.header.format(self.payload.len() as u64, &mut head);
        let payload = match self.header.mask {
            Some(mask) => {
                let mut masked = self.payload.to_vec();
                apply_mask(&mut masked, mask);
                masked.into()
            }
            None => self.payload,
        };
        (head.into(), payload)
    }

    /// Write a frame out to a buffer.
    pub fn format(mut self, output: &mut Vec<u8>) {
        self.header.format(self.payload.len() as u64, output);
        match self.header.mask.take() {
            Some(mask) => {
                let start = output.len();
                output.put_slice(&self.payload);
                apply_mask(&mut output[start..], mask);
            }
            None => output.put_slice(&self.payload),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use std::fmt::Write;

        write!(
            f,
            "
<FRAME>
final: {}
reserved: {} {} {}
opcode: {}
length: {}
payload length: {}
payload: 0x{}
            ",
            self.header.is_final,
            self.header.rsv1,
            self.header.rsv2,
            self.header.rsv3,
            self.header.opcode,
            self.len(),
            self.payload.len(),
            self.payload.iter().fold(String::new(), |mut output, byte| {
                _ = write!(output, "{byte:02x}");
                output
            })
        )
    }
}

/// Handling of the length format.
enum LengthFormat {
    U8(u8),
    U16,
    U64,
}

impl LengthFormat {
    /// Get the length format for a given data size.
    #[inline]
    fn for_length(length: u64) -> Self {
        if length < 126 {
            LengthFormat::U8(length as u8)
        } else if length < 65536 {
            LengthFormat::U16
        } else {
            LengthFormat::U64
        }
    }

    /// Get the size of the length encoding.
    #[inline]
    fn extra_bytes(&self) -> usize {
        match *self {
            LengthFormat::U8(_) => 0,
            LengthFormat::U16 => 2,
            LengthFormat::U64 => 8,
        }
    }

    /// Encode the given length.
    #[inline]
    fn length_byte(&self) -> u8 {
        match *self {
            LengthFormat::U8(b) => b,
            LengthFormat::U16 => 126,
            LengthFormat::U64 => 127,
        }
    }

    /// Get the length format for a given length byte.
    #[inline]
    fn for_byte(byte: u8) -> Self {
        match byte & 0x7F {
            126 => LengthFormat::U16,
            127 => LengthFormat::U64,
            b => LengthFormat::U8(b),
        }
    }
}
