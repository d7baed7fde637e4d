//! Frame encoding with role-based masking.

use bytes::{Bytes, BytesMut};

use crate::connection::Role;
use crate::error::Result;
use crate::protocol::Frame;
use crate::protocol::mask::random_mask;

/// Serializes frames for one side of a connection.
///
/// Clients get a fresh random masking key per frame; servers never mask.
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    role: Role,
}

impl FrameEncoder {
    #[must_use]
    pub const fn new(role: Role) -> Self {
        Self { role }
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Append the wire form of `frame` to `dst`.
    ///
    /// # Errors
    ///
    /// - `Error::FragmentedControlFrame` if a control frame has FIN=0
    /// - `Error::ControlFrameTooLarge` if a control payload exceeds 125 bytes
    pub fn encode(&self, frame: &Frame, dst: &mut BytesMut) -> Result<()> {
        frame.validate()?;
        let mask = self.role.must_mask().then(random_mask);
        frame.write_to(dst, mask);
        Ok(())
    }

    /// Encode a single frame into its own buffer.
    ///
    /// # Errors
    ///
    /// Same as [`encode`](Self::encode).
    pub fn encode_to_bytes(&self, frame: &Frame) -> Result<Bytes> {
        let mut dst = BytesMut::with_capacity(frame.wire_size(self.role.must_mask()));
        self.encode(frame, &mut dst)?;
        Ok(dst.freeze())
    }
}
