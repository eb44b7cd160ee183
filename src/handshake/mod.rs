//! The WebSocket upgrade handshake.

pub mod headers;
pub mod server;

use data_encoding::BASE64;
use sha1::{Digest, Sha1};

pub use self::headers::HandshakeRequest;

/// The end of an HTTP request head.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Length of a valid `Sec-WebSocket-Key` value (a base64-encoded 16 byte nonce).
pub const CLIENT_KEY_LEN: usize = 24;

/// Length of the derived `Sec-WebSocket-Accept` value (a base64-encoded SHA-1 digest).
pub const ACCEPT_KEY_LEN: usize = 28;

/// Derive the `Sec-WebSocket-Accept` value from a `Sec-WebSocket-Key`.
///
/// ```
/// assert_eq!(
///     tickws::derive_accept_key(b"dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=",
/// );
/// ```
pub fn derive_accept_key(client_key: &[u8]) -> String {
    // ... field is constructed by concatenating /key/ ...
    // ... with the string "258EAFA5-E914-47DA-95CA-C5AB0DC85B11" (RFC 6455)
    const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
    let mut sha1 = Sha1::default();
    sha1.update(client_key);
    sha1.update(WS_GUID);
    BASE64.encode(&sha1.finalize())
}

/// The complete `101 Switching Protocols` response for the given accept key.
pub fn switching_protocols(accept_key: &str) -> String {
    format!(
        "\
        HTTP/1.1 101 Switching Protocols\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Accept: {accept_key}\r\n\
        \r\n"
    )
}
