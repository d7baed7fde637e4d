//! Frame codec.
//!
//! Decoding and encoding are split: [`FrameDecoder`] turns bytes into
//! validated, unmasked frames and [`FrameEncoder`] does the reverse with the
//! masking rule of the local role. Neither touches I/O; the async driver in
//! [`crate::connection`] feeds them.

mod decoder;
mod encoder;

pub use decoder::{Decoded, FrameDecoder, FrameHeader, ReadBuffer};
pub use encoder::FrameEncoder;
