//! WebSocket frame representation and serialization (RFC 6455 Section 5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```
//!
//! Decoding lives in [`crate::codec`]; this module only knows how to build
//! frames and lay them out on the wire.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame, Message};
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask;

/// Maximum payload size for control frames.
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Largest payload that fits the 7-bit length form.
const LEN_7_MAX: usize = 125;
/// Largest payload that fits the 16-bit extended length form.
const LEN_16_MAX: usize = u16::MAX as usize;

/// A single WebSocket frame.
///
/// Frames are built per read or write and are not shared; the payload is a
/// cheaply clonable [`Bytes`] so unmasked payloads can be sliced straight
/// out of the read buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment of a message.
    pub fin: bool,
    /// Reserved bit 1, claimed by extensions such as permessage-deflate.
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: OpCode,
    payload: Bytes,
}

impl Frame {
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            payload: payload.into(),
        }
    }

    #[must_use]
    pub fn text(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, data)
    }

    #[must_use]
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, data)
    }

    #[must_use]
    pub fn continuation(fin: bool, data: impl Into<Bytes>) -> Self {
        Self::new(fin, OpCode::Continuation, data)
    }

    #[must_use]
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, data)
    }

    #[must_use]
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, data)
    }

    /// Close frame with an optional status code and reason.
    ///
    /// Without a [`CloseFrame`] the payload is empty.
    #[must_use]
    pub fn close(close: Option<&CloseFrame>) -> Self {
        let payload = close.map(CloseFrame::to_payload).unwrap_or_default();
        Self::new(true, OpCode::Close, payload)
    }

    /// Shorthand for a close frame carrying `code` and `reason`.
    #[must_use]
    pub fn close_with(code: CloseCode, reason: &str) -> Self {
        Self::close(Some(&CloseFrame::new(code, reason)))
    }

    #[inline]
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Replace the payload, keeping header bits. Used by extensions.
    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
    }

    /// Whether any reserved bit is set.
    #[inline]
    #[must_use]
    pub fn has_rsv(&self) -> bool {
        self.rsv1 || self.rsv2 || self.rsv3
    }

    /// Decode the status code and reason of a close frame.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` if this is not a close frame
    /// - see [`CloseFrame::parse`] for payload errors
    pub fn close_frame(&self) -> Result<Option<CloseFrame>> {
        if self.opcode != OpCode::Close {
            return Err(Error::ProtocolViolation(format!(
                "{} frame has no close payload",
                self.opcode
            )));
        }
        CloseFrame::parse(&self.payload)
    }

    /// Check the control-frame rules: FIN set and payload <= 125 bytes.
    ///
    /// # Errors
    ///
    /// - `Error::FragmentedControlFrame` if a control frame has FIN=0
    /// - `Error::ControlFrameTooLarge` if a control payload exceeds 125 bytes
    pub fn validate(&self) -> Result<()> {
        if self.opcode.is_control() {
            if !self.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if self.payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(self.payload.len()));
            }
        }
        Ok(())
    }

    /// Header length for this payload size.
    #[must_use]
    pub fn header_len(&self, masked: bool) -> usize {
        let extended = match self.payload.len() {
            0..=LEN_7_MAX => 0,
            126..=LEN_16_MAX => 2,
            _ => 8,
        };
        2 + extended + if masked { 4 } else { 0 }
    }

    /// Total bytes this frame occupies on the wire.
    #[must_use]
    pub fn wire_size(&self, masked: bool) -> usize {
        self.header_len(masked) + self.payload.len()
    }

    /// Append the wire form of this frame to `dst`, masking the payload
    /// with `mask` when one is given.
    pub fn write_to(&self, dst: &mut BytesMut, mask: Option<[u8; 4]>) {
        dst.reserve(self.wire_size(mask.is_some()));

        let mut byte0 = self.opcode.as_u8();
        if self.fin {
            byte0 |= 0x80;
        }
        if self.rsv1 {
            byte0 |= 0x40;
        }
        if self.rsv2 {
            byte0 |= 0x20;
        }
        if self.rsv3 {
            byte0 |= 0x10;
        }
        dst.put_u8(byte0);

        let mask_bit = if mask.is_some() { 0x80 } else { 0 };
        let len = self.payload.len();
        match len {
            0..=LEN_7_MAX => dst.put_u8(mask_bit | len as u8),
            126..=LEN_16_MAX => {
                dst.put_u8(mask_bit | 126);
                dst.put_u16(len as u16);
            }
            _ => {
                dst.put_u8(mask_bit | 127);
                dst.put_u64(len as u64);
            }
        }

        match mask {
            Some(key) => {
                dst.put_slice(&key);
                let start = dst.len();
                dst.put_slice(&self.payload);
                apply_mask(&mut dst[start..], key);
            }
            None => dst.put_slice(&self.payload),
        }
    }
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Frame::text(text),
            Message::Binary(data) => Frame::binary(data),
            Message::Ping(data) => Frame::ping(data),
            Message::Pong(data) => Frame::pong(data),
            Message::Close(close) => Frame::close(close.as_ref()),
        }
    }
}
