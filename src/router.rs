//! Dispatch of inbound messages to application handlers.
//!
//! A [`Router`] holds any number of bindings. Each inbound data message is offered to
//! every binding whose shape it matches, in registration order:
//!
//! * [`Router::on_message`] sees every message;
//! * [`Router::on_text_command`] sees text messages equal to a command;
//! * [`Router::on_text`] sees text messages no command matched;
//! * [`Router::on_binary_len`] sees binary messages of an exact length.
//!
//! Handlers reply through the [`Outbox`] they are given. The session enqueues those
//! replies once the handler returns.

use std::fmt;

use bytes::Bytes;
use log::debug;

use crate::protocol::{Message, OutboundMessage};

/// Application callback for inbound messages.
///
/// Implemented for every `FnMut(&Message<'_>, &mut Outbox)` closure.
pub trait Handler {
    /// Handle one message. The payload is only valid for the duration of the call.
    fn handle(&mut self, message: &Message<'_>, outbox: &mut Outbox);
}

impl<F> Handler for F
where
    F: FnMut(&Message<'_>, &mut Outbox),
{
    fn handle(&mut self, message: &Message<'_>, outbox: &mut Outbox) {
        self(message, outbox)
    }
}

/// Replies queued by handlers during a dispatch.
#[derive(Debug, Default)]
pub struct Outbox {
    messages: Vec<OutboundMessage>,
}

impl Outbox {
    /// Create an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a text reply.
    pub fn text(&mut self, text: impl Into<Bytes>) {
        self.push(OutboundMessage::text(text));
    }

    /// Queue a binary reply.
    pub fn binary(&mut self, data: impl Into<Bytes>) {
        self.push(OutboundMessage::binary(data));
    }

    /// Queue a reply.
    pub fn push(&mut self, message: OutboundMessage) {
        self.messages.push(message);
    }

    /// Number of queued replies.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether no reply is queued.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Take the queued replies, in the order they were queued.
    pub fn drain(&mut self) -> impl Iterator<Item = OutboundMessage> + '_ {
        self.messages.drain(..)
    }
}

/// Whether a dispatched message reached any handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// At least one handler ran.
    Handled,
    /// No binding matched; the message was dropped.
    Ignored,
}

enum Route {
    Any,
    TextCommand(Vec<u8>),
    TextFallback,
    BinaryLen(usize),
}

struct Binding {
    route: Route,
    handler: Box<dyn Handler>,
}

/// Message router with multiple bindings.
#[derive(Default)]
pub struct Router {
    bindings: Vec<Binding>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Router").field("bindings", &self.bindings.len()).finish()
    }
}

impl Router {
    /// Create a router without bindings. Every message is ignored until one is added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to every data message.
    pub fn on_message(&mut self, handler: impl Handler + 'static) -> &mut Self {
        self.bind(Route::Any, handler)
    }

    /// Bind `handler` to text messages whose payload equals `command` exactly.
    pub fn on_text_command(&mut self, command: impl AsRef<[u8]>, handler: impl Handler + 'static) -> &mut Self {
        self.bind(Route::TextCommand(command.as_ref().to_vec()), handler)
    }

    /// Bind `handler` to text messages that matched no command binding.
    pub fn on_text(&mut self, handler: impl Handler + 'static) -> &mut Self {
        self.bind(Route::TextFallback, handler)
    }

    /// Bind `handler` to binary messages exactly `len` bytes long.
    pub fn on_binary_len(&mut self, len: usize, handler: impl Handler + 'static) -> &mut Self {
        self.bind(Route::BinaryLen(len), handler)
    }

    fn bind(&mut self, route: Route, handler: impl Handler + 'static) -> &mut Self {
        self.bindings.push(Binding { route, handler: Box::new(handler) });
        self
    }

    /// Offer `message` to every matching binding.
    pub fn dispatch(&mut self, message: &Message<'_>, outbox: &mut Outbox) -> Dispatch {
        let mut handled = false;
        let mut command_matched = false;

        for binding in &mut self.bindings {
            let matches = match (&binding.route, message) {
                (Route::Any, _) => true,
                (Route::TextCommand(command), Message::Text(payload)) => {
                    let hit = command.as_slice() == *payload;
                    command_matched |= hit;
                    hit
                }
                (Route::BinaryLen(len), Message::Binary(payload)) => payload.len() == *len,
                _ => false,
            };
            if matches {
                binding.handler.handle(message, outbox);
                handled = true;
            }
        }

        if message.is_text() && !command_matched {
            for binding in &mut self.bindings {
                if let Route::TextFallback = binding.route {
                    binding.handler.handle(message, outbox);
                    handled = true;
                }
            }
        }

        if handled {
            Dispatch::Handled
        } else {
            debug!("Ignoring {} message of {} bytes", if message.is_text() { "text" } else { "binary" }, message.len());
            Dispatch::Ignored
        }
    }
}
