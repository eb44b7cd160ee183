//! Parsing of the client's upgrade request.
//!
//! The request head is tokenized with `httparse`, so a field name only ever matches at
//! the start of a header line and is always delimited by `:`. Required values are then
//! searched for inside their own field value with explicit token boundaries.

use http::{Request, Uri, Version};
use httparse::Status;
use log::{debug, trace};

use super::CLIENT_KEY_LEN;
use crate::error::HandshakeError;

// Limit the number of header lines.
const MAX_HEADERS: usize = 124;

/// The buffered upgrade request of a single connection attempt.
#[derive(Debug)]
pub struct HandshakeRequest {
    raw: Vec<u8>,
    target: String,
    request: Request<()>,
}

impl HandshakeRequest {
    /// Tokenize a request head.
    ///
    /// `raw` must contain the complete head including the blank line that ends it.
    /// Anything after the blank line is not looked at.
    pub fn parse(raw: &[u8]) -> Result<Self, HandshakeError> {
        let mut hbuffer = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut hbuffer);
        let size = match req.parse(raw)? {
            Status::Complete(size) => size,
            Status::Partial => {
                return Err(HandshakeError::Malformed("incomplete request head".into()))
            }
        };

        let (method, path, version) = match (req.method, req.path, req.version) {
            (Some(method), Some(path), Some(version)) => (method, path, version),
            _ => return Err(HandshakeError::Malformed("no request line".into())),
        };
        let mut builder = Request::builder()
            .method(method)
            .version(if version == 0 { Version::HTTP_10 } else { Version::HTTP_11 });
        // The target plays no part in validation; keep requests whose target is not a URI.
        match path.parse::<Uri>() {
            Ok(uri) => builder = builder.uri(uri),
            Err(err) => debug!("Request target {path:?} is not a URI: {err}"),
        }
        for header in req.headers.iter() {
            builder = builder.header(header.name, header.value);
        }
        let request = builder.body(())?;
        trace!("Parsed upgrade request {} {}", request.method(), request.uri());

        Ok(HandshakeRequest { raw: raw[..size].to_vec(), target: path.to_owned(), request })
    }

    /// The request head up to and including the terminating blank line.
    pub fn raw_header_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// The request target exactly as sent.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The tokenized request. Its URI is `/` when the target does not parse as one;
    /// see [`Self::target`].
    pub fn request(&self) -> &Request<()> {
        &self.request
    }

    /// First value of the given field, if present.
    pub fn field(&self, name: &str) -> Option<&[u8]> {
        self.request.headers().get(name).map(|value| value.as_bytes())
    }

    /// Check whether any `name` field carries `token` as a delimited token.
    ///
    /// Both the field name and the token compare ASCII case-insensitively. The token must
    /// be bounded by non-alphanumeric bytes (or the edges of the value), so `websocketx`
    /// does not contain `websocket` but `keep-alive, Upgrade` contains `Upgrade`.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.request
            .headers()
            .get_all(name)
            .iter()
            .any(|value| contains_token(value.as_bytes(), token.as_bytes()))
    }

    /// Validate the three headers that establish trust and return the client key.
    pub fn validate(&self) -> Result<&[u8], HandshakeError> {
        if !self.has_token("Upgrade", "websocket") {
            return Err(HandshakeError::MissingHeader("Upgrade"));
        }
        if !self.has_token("Connection", "Upgrade") {
            return Err(HandshakeError::MissingHeader("Connection"));
        }
        let value =
            self.field("Sec-WebSocket-Key").ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Key"))?;
        let key = trim_key(value);
        if key.len() != CLIENT_KEY_LEN {
            return Err(HandshakeError::InvalidKey(key.len()));
        }
        Ok(key)
    }
}

/// Find `token` in `value` with non-alphanumeric bytes on both sides.
///
/// Every occurrence is examined, so a rejected partial match does not hide a valid
/// one further on.
fn contains_token(value: &[u8], token: &[u8]) -> bool {
    if token.is_empty() || value.len() < token.len() {
        return false;
    }
    (0..=value.len() - token.len()).any(|start| {
        let end = start + token.len();
        value[start..end].eq_ignore_ascii_case(token)
            && (start == 0 || !value[start - 1].is_ascii_alphanumeric())
            && value.get(end).map_or(true, |byte| !byte.is_ascii_alphanumeric())
    })
}

/// Skip leading blanks; the key ends at the first blank after it.
fn trim_key(value: &[u8]) -> &[u8] {
    let is_blank = |byte: &u8| *byte == b' ' || *byte == b'\t';
    let start = value.iter().position(|b| !is_blank(b)).unwrap_or(value.len());
    let value = &value[start..];
    let end = value.iter().position(is_blank).unwrap_or(value.len());
    &value[..end]
}
