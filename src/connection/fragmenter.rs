//! Splitting outgoing messages into frames.

use bytes::Bytes;

use crate::protocol::{Frame, OpCode};

/// Iterator over the frames of one outgoing message.
///
/// The first frame carries the message opcode, later ones
/// [`OpCode::Continuation`]; only the last has FIN set. Payload slices share
/// the message buffer.
#[derive(Debug)]
pub struct MessageFragmenter {
    payload: Bytes,
    opcode: OpCode,
    fragment_size: usize,
    first: bool,
}

impl MessageFragmenter {
    /// `fragment_size` of zero is treated as one byte per frame.
    #[must_use]
    pub fn new(payload: Bytes, opcode: OpCode, fragment_size: usize) -> Self {
        Self {
            payload,
            opcode,
            fragment_size: fragment_size.max(1),
            first: true,
        }
    }

    #[inline]
    #[must_use]
    pub fn needs_fragmentation(&self) -> bool {
        self.payload.len() > self.fragment_size
    }

    /// Bytes not yet handed out.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.payload.len()
    }
}

impl Iterator for MessageFragmenter {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.payload.is_empty() && !self.first {
            return None;
        }

        let chunk = self
            .payload
            .split_to(self.payload.len().min(self.fragment_size));
        let opcode = if std::mem::take(&mut self.first) {
            self.opcode
        } else {
            OpCode::Continuation
        };
        Some(Frame::new(self.payload.is_empty(), opcode, chunk))
    }
}
