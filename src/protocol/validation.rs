//! Header validation for incoming frames (RFC 6455 Sections 5.1, 5.2, 5.5).
//!
//! Checks run as soon as a header is fully parsed, before any payload is
//! buffered, so an oversized or malformed frame never costs more than its
//! header.

use crate::codec::FrameHeader;
use crate::config::Limits;
use crate::connection::Role;
use crate::error::{Error, Result};
use crate::extensions::RsvBits;
use crate::protocol::frame::MAX_CONTROL_FRAME_PAYLOAD;

/// Validator for incoming frame headers.
///
/// Enforces the masking rule for the endpoint's role, rejects reserved bits
/// no negotiated extension claims, applies the control-frame rules, and
/// bounds the payload size.
#[derive(Debug, Clone)]
pub struct FrameValidator {
    role: Role,
    limits: Limits,
    accept_unmasked_frames: bool,
    allowed_rsv: RsvBits,
}

impl FrameValidator {
    #[must_use]
    pub fn new(role: Role, limits: Limits) -> Self {
        Self {
            role,
            limits,
            accept_unmasked_frames: false,
            allowed_rsv: RsvBits::NONE,
        }
    }

    /// Accept unmasked frames from clients. Violates RFC 6455.
    #[must_use]
    pub fn with_accept_unmasked(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }

    /// Reserved bits claimed by the negotiated extensions.
    #[must_use]
    pub fn with_rsv_bits(mut self, bits: RsvBits) -> Self {
        self.allowed_rsv = bits;
        self
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Validate a parsed frame header.
    ///
    /// Checks run in a fixed order: masking, reserved bits, control rules,
    /// size.
    ///
    /// # Errors
    ///
    /// - `Error::UnmaskedClientFrame` / `Error::MaskedServerFrame` on a masking violation
    /// - `Error::ReservedBitsSet` for RSV bits no extension claims
    /// - `Error::FragmentedControlFrame` / `Error::ControlFrameTooLarge` for bad control frames
    /// - `Error::FrameTooLarge` if the payload exceeds the frame limit
    pub fn validate(&self, header: &FrameHeader) -> Result<()> {
        self.validate_masking(header.mask.is_some())?;
        self.validate_rsv_bits(header.rsv1, header.rsv2, header.rsv3)?;

        if header.opcode.is_control() {
            if !header.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if header.payload_len > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(header.payload_len));
            }
        }

        self.limits.check_frame_size(header.payload_len)
    }

    fn validate_masking(&self, masked: bool) -> Result<()> {
        match self.role {
            Role::Server if !masked && !self.accept_unmasked_frames => {
                Err(Error::UnmaskedClientFrame)
            }
            Role::Client if masked => Err(Error::MaskedServerFrame),
            _ => Ok(()),
        }
    }

    fn validate_rsv_bits(&self, rsv1: bool, rsv2: bool, rsv3: bool) -> Result<()> {
        let used = RsvBits { rsv1, rsv2, rsv3 };
        if self.allowed_rsv.covers(&used) {
            Ok(())
        } else {
            Err(Error::ReservedBitsSet)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OpCode;

    fn header(opcode: OpCode, masked: bool, payload_len: usize) -> FrameHeader {
        FrameHeader {
            fin: true,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            mask: masked.then_some([1, 2, 3, 4]),
            payload_len,
            header_len: 2,
        }
    }

    #[test]
    fn test_server_rejects_unmasked_client_frame() {
        let validator = FrameValidator::new(Role::Server, Limits::default());
        assert_eq!(
            validator.validate(&header(OpCode::Text, false, 10)),
            Err(Error::UnmaskedClientFrame)
        );
        assert!(validator.validate(&header(OpCode::Text, true, 10)).is_ok());
    }

    #[test]
    fn test_client_rejects_masked_server_frame() {
        let validator = FrameValidator::new(Role::Client, Limits::default());
        assert_eq!(
            validator.validate(&header(OpCode::Binary, true, 10)),
            Err(Error::MaskedServerFrame)
        );
        assert!(validator.validate(&header(OpCode::Binary, false, 10)).is_ok());
    }

    #[test]
    fn test_server_accepts_unmasked_when_configured() {
        let validator =
            FrameValidator::new(Role::Server, Limits::default()).with_accept_unmasked(true);
        assert!(validator.validate(&header(OpCode::Text, false, 10)).is_ok());
    }

    #[test]
    fn test_rsv_bits_rejected_unless_negotiated() {
        let mut h = header(OpCode::Text, false, 4);
        h.rsv1 = true;

        let plain = FrameValidator::new(Role::Client, Limits::default());
        assert_eq!(plain.validate(&h), Err(Error::ReservedBitsSet));

        let deflate = plain.clone().with_rsv_bits(RsvBits::RSV1);
        assert!(deflate.validate(&h).is_ok());

        h.rsv2 = true;
        assert_eq!(deflate.validate(&h), Err(Error::ReservedBitsSet));
    }

    #[test]
    fn test_control_frame_rules() {
        let validator = FrameValidator::new(Role::Client, Limits::default());

        let mut fragmented = header(OpCode::Ping, false, 3);
        fragmented.fin = false;
        assert_eq!(validator.validate(&fragmented), Err(Error::FragmentedControlFrame));

        assert_eq!(
            validator.validate(&header(OpCode::Close, false, 126)),
            Err(Error::ControlFrameTooLarge(126))
        );
        assert!(validator.validate(&header(OpCode::Pong, false, 125)).is_ok());
    }

    #[test]
    fn test_frame_size_limit() {
        let validator = FrameValidator::new(Role::Client, Limits::new(100, 1000, 4, 1024));
        assert!(validator.validate(&header(OpCode::Binary, false, 100)).is_ok());
        assert_eq!(
            validator.validate(&header(OpCode::Binary, false, 101)),
            Err(Error::FrameTooLarge { size: 101, max: 100 })
        );
    }

    #[test]
    fn test_masking_checked_before_rsv_and_size() {
        let validator = FrameValidator::new(Role::Server, Limits::new(10, 10, 1, 10));
        let mut h = header(OpCode::Text, false, 1000);
        h.rsv3 = true;
        assert_eq!(validator.validate(&h), Err(Error::UnmaskedClientFrame));

        h.mask = Some([0; 4]);
        assert_eq!(validator.validate(&h), Err(Error::ReservedBitsSet));
    }
}
