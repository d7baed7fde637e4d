//! Message reassembly (RFC 6455 Section 5.4).
//!
//! The assembler sees data frames only; control frames interleaved between
//! fragments are routed by the connection and never touch assembler state.

use bytes::{Bytes, BytesMut};

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::message::{Fragment, Message};
use crate::protocol::utf8::Utf8Decoder;
use crate::protocol::{Frame, OpCode};

/// What a data frame contributed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageEvent {
    /// The frame was buffered; nothing to deliver yet.
    None,
    /// Streaming mode: one piece of a fragmented message.
    Partial(Fragment, bool),
    /// A whole message.
    Complete(Message),
}

#[derive(Debug)]
struct InProgress {
    opcode: OpCode,
    text: String,
    binary: BytesMut,
    utf8: Utf8Decoder,
    size: usize,
    fragments: usize,
}

/// Reassembles fragmented messages and enforces the size policy.
///
/// In buffered mode a fragmented message is delivered once, when its final
/// frame arrives. In streaming mode every frame of a fragmented message is
/// delivered as a [`MessageEvent::Partial`]; unfragmented messages are
/// always delivered whole. Text is validated incrementally in both modes so
/// invalid UTF-8 fails the connection at the frame that carries it.
#[derive(Debug)]
pub struct MessageAssembler {
    limits: Limits,
    streaming: bool,
    current: Option<InProgress>,
}

impl MessageAssembler {
    #[must_use]
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            streaming: false,
            current: None,
        }
    }

    #[must_use]
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Feed one data frame.
    ///
    /// Control frames are ignored and leave any in-progress message intact.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` for a continuation with no open message,
    ///   or a new text/binary frame while a message is open
    /// - `Error::MessageTooLarge` / `Error::TooManyFragments` on the size policy
    /// - `Error::InvalidUtf8` for text that is not valid UTF-8
    pub fn feed(&mut self, frame: Frame) -> Result<MessageEvent> {
        if frame.opcode.is_control() {
            return Ok(MessageEvent::None);
        }

        match (frame.opcode, self.current.is_some()) {
            (OpCode::Continuation, false) => Err(Error::ProtocolViolation(
                "continuation frame without a message in progress".into(),
            )),
            (OpCode::Continuation, true) => self.continue_message(frame),
            (opcode, true) => Err(Error::ProtocolViolation(format!(
                "{opcode} frame while a fragmented message is in progress"
            ))),
            (_, false) if frame.fin => self.whole_message(frame),
            (_, false) => self.open_message(frame),
        }
    }

    /// A message is open and waiting for continuation frames.
    #[must_use]
    pub fn is_assembling(&self) -> bool {
        self.current.is_some()
    }

    /// Frames received so far for the open message.
    #[must_use]
    pub fn fragment_count(&self) -> usize {
        self.current.as_ref().map_or(0, |m| m.fragments)
    }

    /// Discard any open message.
    pub fn reset(&mut self) {
        self.current = None;
    }

    fn whole_message(&mut self, frame: Frame) -> Result<MessageEvent> {
        self.limits.check_message_size(frame.payload().len())?;
        let message = if frame.opcode == OpCode::Text {
            Message::Text(std::str::from_utf8(frame.payload())?.to_owned())
        } else {
            Message::Binary(frame.into_payload())
        };
        Ok(MessageEvent::Complete(message))
    }

    fn open_message(&mut self, frame: Frame) -> Result<MessageEvent> {
        self.limits.check_message_size(frame.payload().len())?;
        self.limits.check_fragment_count(1)?;

        let mut message = InProgress {
            opcode: frame.opcode,
            text: String::new(),
            binary: BytesMut::new(),
            utf8: Utf8Decoder::new(),
            size: 0,
            fragments: 0,
        };
        let event = self.append(&mut message, frame.payload(), false)?;
        self.current = Some(message);
        Ok(event)
    }

    fn continue_message(&mut self, frame: Frame) -> Result<MessageEvent> {
        let Some(mut message) = self.current.take() else {
            return Err(Error::ProtocolViolation(
                "continuation frame without a message in progress".into(),
            ));
        };

        let size = message.size.saturating_add(frame.payload().len());
        self.limits.check_message_size(size)?;
        self.limits.check_fragment_count(message.fragments + 1)?;

        let event = self.append(&mut message, frame.payload(), frame.fin)?;
        if frame.fin {
            return Ok(match event {
                MessageEvent::None => MessageEvent::Complete(finish(message)),
                partial => partial,
            });
        }
        self.current = Some(message);
        Ok(event)
    }

    fn append(&self, message: &mut InProgress, payload: &Bytes, fin: bool) -> Result<MessageEvent> {
        message.size += payload.len();
        message.fragments += 1;

        let event = match (message.opcode, self.streaming) {
            (OpCode::Text, true) => {
                MessageEvent::Partial(Fragment::Text(message.utf8.decode(payload, fin)?), fin)
            }
            (OpCode::Text, false) => {
                message.utf8.decode_into(payload, fin, &mut message.text)?;
                MessageEvent::None
            }
            (_, true) => MessageEvent::Partial(Fragment::Binary(payload.clone()), fin),
            (_, false) => {
                message.binary.extend_from_slice(payload);
                MessageEvent::None
            }
        };
        Ok(event)
    }
}

fn finish(message: InProgress) -> Message {
    if message.opcode == OpCode::Text {
        Message::Text(message.text)
    } else {
        Message::Binary(message.binary.freeze())
    }
}
