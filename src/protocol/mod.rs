//! WebSocket framing and the messages carried over it.

pub mod codec;
pub mod frame;

mod message;

pub use self::{
    codec::{FrameCodec, Step},
    message::{Message, OutboundMessage},
};
