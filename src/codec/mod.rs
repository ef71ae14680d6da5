//! Audio Codec Kit (spec §4.1)
//!
//! Pure, stateless, deterministic functions only: µ-law companding, linear
//! resampling for the rate pairs the bridge actually needs, RMS energy, and
//! small buffer helpers. Nothing in this module touches a socket or a clock.

mod mulaw;
mod resample;
mod rms;

pub use mulaw::{mulaw_decode, mulaw_encode};
pub use resample::resample;
pub use rms::rms;

use crate::error::{BridgeError, Result};

/// Decode a little-endian PCM16 byte buffer into samples.
///
/// Fails with [`BridgeError::InvalidPcmLength`] if `bytes.len()` is odd.
pub fn pcm16_from_bytes(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(BridgeError::InvalidPcmLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect())
}

/// Encode PCM16 samples into a little-endian byte buffer.
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Concatenate PCM16 buffers.
pub fn concat(chunks: &[&[i16]]) -> Vec<i16> {
    let total: usize = chunks.iter().map(|c| c.len()).sum();
    let mut out = Vec::with_capacity(total);
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    out
}

/// Slice `samples` into `[start, end)`, clamped to the buffer's bounds.
pub fn slice(samples: &[i16], start: usize, end: usize) -> &[i16] {
    let start = start.min(samples.len());
    let end = end.min(samples.len()).max(start);
    &samples[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_length_byte_buffer_fails() {
        let bytes = [0u8, 1, 2];
        assert!(matches!(
            pcm16_from_bytes(&bytes),
            Err(BridgeError::InvalidPcmLength(3))
        ));
    }

    #[test]
    fn pcm_bytes_round_trip() {
        let samples: Vec<i16> = vec![0, 1, -1, i16::MIN, i16::MAX];
        let bytes = pcm16_to_bytes(&samples);
        let back = pcm16_from_bytes(&bytes).unwrap();
        assert_eq!(samples, back);
    }

    #[test]
    fn concat_and_slice() {
        let a = [1i16, 2, 3];
        let b = [4i16, 5];
        let joined = concat(&[&a, &b]);
        assert_eq!(joined, vec![1, 2, 3, 4, 5]);
        assert_eq!(slice(&joined, 1, 4), &[2, 3, 4]);
        assert_eq!(slice(&joined, 10, 20), &[] as &[i16]);
    }
}
