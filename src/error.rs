//! Error types for the WebSocket protocol engine.
//!
//! Every failure the engine can report is a variant of [`Error`]. Protocol-level
//! errors carry enough information to pick the close code the connection is
//! failed with (see [`Error::close_code`]).

use thiserror::Error;

use crate::message::CloseCode;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The upgrade request or response does not conform to RFC 6455.
    #[error("Malformed handshake: {0}")]
    MalformedHandshake(String),

    /// Handshake data exceeds the configured maximum.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes received so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The Origin header is not in the allow-list.
    #[error("Origin not allowed: {origin}")]
    OriginNotAllowed {
        /// The rejected origin.
        origin: String,
    },

    /// The client asked for a protocol version other than 13.
    #[error("Unsupported WebSocket version: {0}")]
    UnsupportedVersion(String),

    /// A header value cannot be written safely.
    #[error("Invalid value for header {header}: {reason}")]
    InvalidHeaderValue {
        /// Header name.
        header: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Generic protocol violation (fragmentation order, unexpected frames, ...).
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Reserved bits set without a negotiated extension claiming them.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Control frame with FIN=0.
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload larger than 125 bytes.
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// A server received an unmasked frame.
    #[error("Client frame must be masked")]
    UnmaskedClientFrame,

    /// A client received a masked frame.
    #[error("Server frame must not be masked")]
    MaskedServerFrame,

    /// Close code that must not appear on the wire.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Close payload that is neither empty nor a code plus UTF-8 reason.
    #[error("Invalid close frame payload")]
    InvalidCloseFrame,

    /// Invalid UTF-8 in a text message or close reason.
    #[error("Invalid UTF-8 in text payload")]
    InvalidUtf8,

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Message size exceeds configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Accumulated message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Too many fragments in a single message.
    #[error("Too many fragments: {count} (max: {max})")]
    TooManyFragments {
        /// Actual fragment count.
        count: usize,
        /// Maximum allowed fragments.
        max: usize,
    },

    /// Send or close attempted while the connection is not CONNECTED.
    #[error("WebSocket is not connected")]
    NotConnected,

    /// The underlying transport failed.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// An extension failed to transform a frame.
    #[error("Extension error: {0}")]
    Extension(String),

    /// Invalid extension configuration or negotiation.
    #[error("Invalid extension: {0}")]
    InvalidExtension(String),

    /// A listener callback panicked during event fan-out.
    #[error("Listener panicked: {0}")]
    ListenerPanicked(String),
}

impl Error {
    /// Close code the connection is failed with when this error is detected
    /// on incoming data.
    ///
    /// Returns `None` for errors that never produce a close frame.
    #[must_use]
    pub const fn close_code(&self) -> Option<CloseCode> {
        match self {
            Error::ProtocolViolation(_)
            | Error::ReservedOpcode(_)
            | Error::ReservedBitsSet
            | Error::FragmentedControlFrame
            | Error::ControlFrameTooLarge(_)
            | Error::UnmaskedClientFrame
            | Error::MaskedServerFrame
            | Error::InvalidCloseCode(_)
            | Error::InvalidCloseFrame => Some(CloseCode::ProtocolError),
            Error::InvalidUtf8 => Some(CloseCode::InvalidPayload),
            Error::FrameTooLarge { .. } | Error::MessageTooLarge { .. } => {
                Some(CloseCode::MessageTooBig)
            }
            Error::TooManyFragments { .. } => Some(CloseCode::PolicyViolation),
            Error::Extension(_) => Some(CloseCode::InternalError),
            _ => None,
        }
    }

    /// Whether this error fails the connection with a close frame.
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        self.close_code().is_some()
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}
