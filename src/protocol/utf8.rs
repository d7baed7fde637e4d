//! Incremental UTF-8 decoding for fragmented text messages.
//!
//! A multi-byte code point may be split across frame boundaries. The decoder
//! emits every complete code point as soon as it arrives and carries an
//! incomplete trailing sequence (at most three bytes) into the next call.

use crate::error::{Error, Result};

/// Streaming UTF-8 decoder.
#[derive(Debug, Clone, Default)]
pub struct Utf8Decoder {
    pending: [u8; 4],
    pending_len: usize,
}

impl Utf8Decoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk, appending complete code points to `out`.
    ///
    /// With `fin` set, an incomplete trailing sequence is an error instead
    /// of being carried forward.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUtf8` on any invalid sequence.
    pub fn decode_into(&mut self, data: &[u8], fin: bool, out: &mut String) -> Result<()> {
        let mut rest = data;

        if self.pending_len > 0 {
            loop {
                match std::str::from_utf8(&self.pending[..self.pending_len]) {
                    Ok(s) => {
                        out.push_str(s);
                        self.pending_len = 0;
                        break;
                    }
                    Err(e) if e.error_len().is_some() => return Err(Error::InvalidUtf8),
                    Err(_) => {
                        let Some((&byte, tail)) = rest.split_first() else {
                            return if fin { Err(Error::InvalidUtf8) } else { Ok(()) };
                        };
                        self.pending[self.pending_len] = byte;
                        self.pending_len += 1;
                        rest = tail;
                    }
                }
            }
        }

        match std::str::from_utf8(rest) {
            Ok(s) => out.push_str(s),
            Err(e) => {
                let (valid, tail) = rest.split_at(e.valid_up_to());
                if e.error_len().is_some() || fin {
                    return Err(Error::InvalidUtf8);
                }
                out.push_str(std::str::from_utf8(valid)?);
                self.pending[..tail.len()].copy_from_slice(tail);
                self.pending_len = tail.len();
            }
        }
        Ok(())
    }

    /// Decode the next chunk into a fresh string.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUtf8` on any invalid sequence.
    pub fn decode(&mut self, data: &[u8], fin: bool) -> Result<String> {
        let mut out = String::with_capacity(data.len() + self.pending_len);
        self.decode_into(data, fin, &mut out)?;
        Ok(out)
    }

    /// Bytes of an incomplete code point waiting for the next chunk.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending_len > 0
    }

    pub fn reset(&mut self) {
        self.pending_len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_chunks_pass_through() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"Hello, ", false).unwrap(), "Hello, ");
        assert_eq!(decoder.decode("世界 🌍".as_bytes(), true).unwrap(), "世界 🌍");
    }

    #[test]
    fn test_code_point_split_across_chunks() {
        // € = E2 82 AC
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&[b'a', 0xe2], false).unwrap(), "a");
        assert!(decoder.has_pending());
        assert_eq!(decoder.decode(&[0x82], false).unwrap(), "");
        assert_eq!(decoder.decode(&[0xac, b'b'], true).unwrap(), "€b");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_every_split_point_of_emoji_text() {
        let text = "a🎉bü€";
        let bytes = text.as_bytes();
        for split in 0..=bytes.len() {
            let mut decoder = Utf8Decoder::new();
            let mut out = decoder.decode(&bytes[..split], false).unwrap();
            out.push_str(&decoder.decode(&bytes[split..], true).unwrap());
            assert_eq!(out, text, "split at {split}");
        }
    }

    #[test]
    fn test_invalid_sequences() {
        for bad in [&[0x80u8][..], &[0xc0, 0x80], &[0xff], &[0xe0, 0x80, 0x80]] {
            assert_eq!(Utf8Decoder::new().decode(bad, false), Err(Error::InvalidUtf8));
        }
    }

    #[test]
    fn test_invalid_continuation_after_pending() {
        let mut decoder = Utf8Decoder::new();
        decoder.decode(&[0xe2], false).unwrap();
        assert_eq!(decoder.decode(&[b'x'], false), Err(Error::InvalidUtf8));
    }

    #[test]
    fn test_incomplete_at_fin_fails() {
        assert_eq!(Utf8Decoder::new().decode(&[0xe2, 0x82], true), Err(Error::InvalidUtf8));

        let mut decoder = Utf8Decoder::new();
        decoder.decode(&[0xf0, 0x9f], false).unwrap();
        assert_eq!(decoder.decode(&[0x8e], true), Err(Error::InvalidUtf8));

        let mut decoder = Utf8Decoder::new();
        decoder.decode(&[0xf0], false).unwrap();
        assert_eq!(decoder.decode(&[], true), Err(Error::InvalidUtf8));
    }

    #[test]
    fn test_reset_discards_pending() {
        let mut decoder = Utf8Decoder::new();
        decoder.decode(&[0xe2], false).unwrap();
        decoder.reset();
        assert_eq!(decoder.decode(b"ok", true).unwrap(), "ok");
    }
}
