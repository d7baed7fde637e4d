//! Message types and close codes as defined in RFC 6455.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Maximum length of a close reason in bytes (125 minus the 2-byte code).
pub const MAX_CLOSE_REASON: usize = 123;

/// WebSocket close status code per RFC 6455 Section 7.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum CloseCode {
    /// Normal closure (1000).
    #[default]
    Normal,
    /// Going away (1001), e.g. server shutdown or page navigation.
    GoingAway,
    /// Protocol error (1002).
    ProtocolError,
    /// Unsupported data (1003).
    UnsupportedData,
    /// Invalid frame payload data (1007), e.g. non-UTF-8 text.
    InvalidPayload,
    /// Policy violation (1008).
    PolicyViolation,
    /// Message too big (1009).
    MessageTooBig,
    /// Mandatory extension missing (1010).
    MandatoryExtension,
    /// Internal error (1011).
    InternalError,
    /// Any other code (1012-1014 registered, 3000-4999 application).
    Other(u16),
}

impl CloseCode {
    /// Create a `CloseCode` from its numeric value.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalError,
            other => CloseCode::Other(other),
        }
    }

    /// Numeric value of this close code.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::Other(code) => *code,
        }
    }

    /// Whether this code may appear in a close frame on the wire.
    ///
    /// 1000-1003, 1007-1014 and 3000-4999 are sendable; everything else
    /// (including 1004-1006 and 1015) is not.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self.as_u16(), 1000..=1003 | 1007..=1014 | 3000..=4999)
    }

    /// Codes reserved for local signalling that an endpoint must never send.
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        matches!(self.as_u16(), 1004..=1006 | 1015)
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Status code and reason carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// The close status code.
    pub code: CloseCode,
    /// Human-readable reason (UTF-8, at most 123 bytes on the wire).
    pub reason: String,
}

impl CloseFrame {
    /// Create a new close frame with the given code and reason.
    #[must_use]
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Decode a close frame payload.
    ///
    /// An empty payload is a close without status (`Ok(None)`). A 1-byte
    /// payload, a code that must not be sent, or a non-UTF-8 reason is
    /// rejected.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidCloseFrame` for a 1-byte payload
    /// - `Error::InvalidCloseCode` for codes outside the sendable ranges
    /// - `Error::InvalidUtf8` for a malformed reason
    pub fn parse(payload: &[u8]) -> Result<Option<Self>> {
        match payload.len() {
            0 => Ok(None),
            1 => Err(Error::InvalidCloseFrame),
            _ => {
                let code = CloseCode::from_u16(u16::from_be_bytes([payload[0], payload[1]]));
                if !code.is_valid() {
                    return Err(Error::InvalidCloseCode(code.as_u16()));
                }
                let reason = std::str::from_utf8(&payload[2..])?;
                Ok(Some(Self::new(code, reason)))
            }
        }
    }

    /// Encode into a close frame payload, truncating the reason to fit in a
    /// control frame on a character boundary.
    #[must_use]
    pub fn to_payload(&self) -> Bytes {
        let mut end = self.reason.len().min(MAX_CLOSE_REASON);
        while !self.reason.is_char_boundary(end) {
            end -= 1;
        }
        let mut buf = BytesMut::with_capacity(2 + end);
        buf.put_u16(self.code.as_u16());
        buf.put_slice(&self.reason.as_bytes()[..end]);
        buf.freeze()
    }
}

/// A complete WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Message {
    /// A text message.
    Text(String),
    /// A binary message.
    Binary(Bytes),
    /// A ping (payload <= 125 bytes).
    Ping(Bytes),
    /// A pong (payload <= 125 bytes).
    Pong(Bytes),
    /// A close, optionally with status code and reason.
    Close(Option<CloseFrame>),
}

impl Message {
    /// Create a text message.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Message::Text(s.into())
    }

    /// Create a binary message.
    #[must_use]
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Message::Binary(data.into())
    }

    /// Create a ping message.
    #[must_use]
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Message::Ping(data.into())
    }

    /// Create a pong message.
    #[must_use]
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Message::Pong(data.into())
    }

    /// Create a close message with status code and reason.
    #[must_use]
    pub fn close(code: CloseCode, reason: impl Into<String>) -> Self {
        Message::Close(Some(CloseFrame::new(code, reason)))
    }

    #[must_use]
    pub const fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    #[must_use]
    pub const fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }

    /// Returns `true` for ping, pong and close.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        matches!(
            self,
            Message::Ping(_) | Message::Pong(_) | Message::Close(_)
        )
    }

    /// Payload length in bytes as it would appear in a frame.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Message::Text(s) => s.len(),
            Message::Binary(b) | Message::Ping(b) | Message::Pong(b) => b.len(),
            Message::Close(None) => 0,
            Message::Close(Some(cf)) => 2 + cf.reason.len().min(MAX_CLOSE_REASON),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the text content, if this is a text message.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the binary content, if this is a binary message.
    #[must_use]
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Message::Binary(data) => Some(data),
            _ => None,
        }
    }
}

/// One piece of a message delivered in streaming mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Part of a text message; always whole code points.
    Text(String),
    /// Part of a binary message.
    Binary(Bytes),
}

impl Fragment {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Fragment::Text(s) => s.len(),
            Fragment::Binary(b) => b.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
