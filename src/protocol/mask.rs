//! Payload masking (RFC 6455 Section 5.3).

/// XOR `data` with `key`, cycling the key from offset 0.
///
/// Masking is its own inverse: applying the same key twice restores the
/// original bytes.
#[inline]
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    let key_word = u32::from_ne_bytes(key);
    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let word = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ key_word;
        chunk.copy_from_slice(&word.to_ne_bytes());
    }
    for (byte, k) in chunks.into_remainder().iter_mut().zip(key) {
        *byte ^= k;
    }
}

/// Fresh masking key from the operating system's RNG.
///
/// Falls back to a time-derived value if the RNG is unavailable.
#[must_use]
pub fn random_mask() -> [u8; 4] {
    let mut key = [0u8; 4];
    if getrandom::getrandom(&mut key).is_err() {
        use std::time::{SystemTime, UNIX_EPOCH};
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0x9E37_79B9);
        key = nanos.wrapping_mul(0x85EB_CA6B).to_le_bytes();
    }
    key
}
