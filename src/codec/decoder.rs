//! Incremental frame decoding.
//!
//! [`FrameDecoder::decode`] works on a borrowed slice and never consumes
//! input on its own: it either returns a complete frame together with the
//! number of bytes it occupied, or reports how many more bytes it needs.
//! [`ReadBuffer`] layers ownership on top of that so a driver can append
//! whatever the transport produced and pull frames out as they complete.

use bytes::{Buf, BytesMut};

use crate::config::Limits;
use crate::connection::Role;
use crate::error::{Error, Result};
use crate::extensions::RsvBits;
use crate::protocol::mask::apply_mask;
use crate::protocol::validation::FrameValidator;
use crate::protocol::{Frame, OpCode};

/// A fully parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: OpCode,
    /// Masking key, present when the MASK bit was set.
    pub mask: Option<[u8; 4]>,
    pub payload_len: usize,
    /// Bytes taken by the header including the masking key.
    pub header_len: usize,
}

impl FrameHeader {
    /// Total bytes of header plus payload.
    #[must_use]
    pub fn frame_len(&self) -> usize {
        self.header_len.saturating_add(self.payload_len)
    }
}

/// Outcome of a single decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame occupying the first `consumed` bytes of the input.
    Frame { frame: Frame, consumed: usize },
    /// At least `needed` more bytes are required before anything can be
    /// decided.
    Incomplete { needed: usize },
}

enum HeaderParse {
    Complete(FrameHeader),
    Incomplete(usize),
}

/// Stateless, resumable frame decoder.
///
/// The decoder keeps no partial state between calls; resuming after an
/// [`Decoded::Incomplete`] is a matter of calling [`decode`](Self::decode)
/// again with the same bytes plus whatever arrived since.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    validator: FrameValidator,
}

impl FrameDecoder {
    #[must_use]
    pub fn new(role: Role, limits: Limits) -> Self {
        Self {
            validator: FrameValidator::new(role, limits),
        }
    }

    #[must_use]
    pub fn with_accept_unmasked(mut self, accept: bool) -> Self {
        self.validator = self.validator.with_accept_unmasked(accept);
        self
    }

    /// Permit the reserved bits claimed by negotiated extensions.
    #[must_use]
    pub fn with_rsv_bits(mut self, bits: RsvBits) -> Self {
        self.validator = self.validator.with_rsv_bits(bits);
        self
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.validator.role()
    }

    /// Parse and validate just the header at the start of `buf`.
    ///
    /// Returns `Ok(None)` when the header itself is still incomplete.
    ///
    /// # Errors
    ///
    /// Any protocol error the header exhibits; see [`FrameValidator::validate`].
    pub fn decode_header(&self, buf: &[u8]) -> Result<Option<FrameHeader>> {
        match self.parse_header(buf)? {
            HeaderParse::Complete(header) => {
                self.validator.validate(&header)?;
                Ok(Some(header))
            }
            HeaderParse::Incomplete(_) => Ok(None),
        }
    }

    /// Try to decode one frame from the start of `buf`.
    ///
    /// The returned frame's payload is already unmasked.
    ///
    /// # Errors
    ///
    /// - `Error::ReservedOpcode` for opcodes 0x3-0x7 and 0xB-0xF
    /// - `Error::ProtocolViolation` for a 64-bit length with the high bit set
    /// - any error from [`FrameValidator::validate`]
    pub fn decode(&self, buf: &[u8]) -> Result<Decoded> {
        let header = match self.parse_header(buf)? {
            HeaderParse::Complete(header) => header,
            HeaderParse::Incomplete(needed) => return Ok(Decoded::Incomplete { needed }),
        };
        self.validator.validate(&header)?;

        let total = header.frame_len();
        if buf.len() < total {
            return Ok(Decoded::Incomplete {
                needed: total - buf.len(),
            });
        }

        let mut payload = BytesMut::from(&buf[header.header_len..total]);
        if let Some(key) = header.mask {
            apply_mask(&mut payload, key);
        }
        Ok(Decoded::Frame {
            frame: build_frame(&header, payload),
            consumed: total,
        })
    }

    fn parse_header(&self, buf: &[u8]) -> Result<HeaderParse> {
        if buf.len() < 2 {
            return Ok(HeaderParse::Incomplete(2 - buf.len()));
        }

        let byte0 = buf[0];
        let byte1 = buf[1];
        let opcode = OpCode::from_u8(byte0 & 0x0F)?;
        let masked = byte1 & 0x80 != 0;
        let len7 = byte1 & 0x7F;

        let ext_len = match len7 {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        let mask_len = if masked { 4 } else { 0 };
        let header_len = 2 + ext_len + mask_len;
        if buf.len() < header_len {
            return Ok(HeaderParse::Incomplete(header_len - buf.len()));
        }

        let payload_len = match len7 {
            126 => usize::from(u16::from_be_bytes([buf[2], buf[3]])),
            127 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[2..10]);
                let len = u64::from_be_bytes(raw);
                if len & (1 << 63) != 0 {
                    return Err(Error::ProtocolViolation(
                        "64-bit payload length has the most significant bit set".into(),
                    ));
                }
                usize::try_from(len).map_err(|_| Error::FrameTooLarge {
                    size: usize::MAX,
                    max: self.validator.limits().max_frame_size,
                })?
            }
            n => usize::from(n),
        };

        let mask = masked.then(|| {
            let at = 2 + ext_len;
            [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]
        });

        Ok(HeaderParse::Complete(FrameHeader {
            fin: byte0 & 0x80 != 0,
            rsv1: byte0 & 0x40 != 0,
            rsv2: byte0 & 0x20 != 0,
            rsv3: byte0 & 0x10 != 0,
            opcode,
            mask,
            payload_len,
            header_len,
        }))
    }
}

fn build_frame(header: &FrameHeader, payload: BytesMut) -> Frame {
    let mut frame = Frame::new(header.fin, header.opcode, payload.freeze());
    frame.rsv1 = header.rsv1;
    frame.rsv2 = header.rsv2;
    frame.rsv3 = header.rsv3;
    frame
}

/// Owned accumulation buffer for bytes read from a transport.
///
/// Complete frames are split off the front without copying; the remaining
/// bytes stay in place for the next call.
#[derive(Debug, Default)]
pub struct ReadBuffer {
    buf: BytesMut,
}

impl ReadBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Direct access for readers that fill the buffer in place.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Split the next complete frame off the buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed. On error the buffer is
    /// left as it was; the connection is expected to fail anyway.
    ///
    /// # Errors
    ///
    /// Any error [`FrameDecoder::decode`] reports for the buffered bytes.
    pub fn decode_next(&mut self, decoder: &FrameDecoder) -> Result<Option<Frame>> {
        let Some(header) = decoder.decode_header(&self.buf)? else {
            return Ok(None);
        };
        if self.buf.len() < header.frame_len() {
            self.buf.reserve(header.frame_len() - self.buf.len());
            return Ok(None);
        }

        self.buf.advance(header.header_len);
        let mut payload = self.buf.split_to(header.payload_len);
        if let Some(key) = header.mask {
            apply_mask(&mut payload, key);
        }
        Ok(Some(build_frame(&header, payload)))
    }
}
