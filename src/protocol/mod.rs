//! WebSocket protocol core (RFC 6455): frames, masking, reassembly and the
//! upgrade handshake. Nothing in here performs I/O.

pub mod assembler;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;
pub mod utf8;
pub mod validation;

pub use assembler::{MessageAssembler, MessageEvent};
pub use frame::{Frame, MAX_CONTROL_FRAME_PAYLOAD};
pub use handshake::{
    AcceptResponse, ClientAccept, ClientHandshake, HandshakeRequest, HandshakeResponse,
    HandshakeValidator, Headers, RequestLine, UpgradeRequest, WS_GUID, compute_accept_key,
};
pub use mask::{apply_mask, random_mask};
pub use opcode::OpCode;
pub use utf8::Utf8Decoder;
pub use validation::FrameValidator;
