//! PCM decoding: response bytes → interleaved i16 → normalized stereo f32.
//!
//! ## Normalization
//!
//! Signed 16-bit audio has one more negative code than positive, so the two
//! halves are scaled separately:
//!
//! ```text
//! v <  0  →  v / 32768      (-32768 → -1.0)
//! v >= 0  →  v / 32767      ( 32767 →  1.0)
//! ```

use crate::buffering::chunk::{RawChunk, Segment};
use crate::error::DecodeError;

const NEG_SCALE: f32 = 32_768.0;
const POS_SCALE: f32 = 32_767.0;

/// Interpret a response body as little-endian i16 samples.
///
/// An empty body yields an empty chunk; the caller decides what that means.
pub fn samples_from_le_bytes(bytes: &[u8]) -> Result<RawChunk, DecodeError> {
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddByteLength { len: bytes.len() });
    }
    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(RawChunk::new(samples))
}

/// Map one signed 16-bit sample into [-1.0, 1.0].
#[inline]
pub fn normalize_sample(v: i16) -> f32 {
    if v < 0 {
        v as f32 / NEG_SCALE
    } else {
        v as f32 / POS_SCALE
    }
}

/// De-interleave and normalize a stereo block.
///
/// Pairs `(2k, 2k+1)` become `(left[k], right[k])`.
pub fn decode_interleaved(samples: &[i16], sample_rate: u32) -> Result<Segment, DecodeError> {
    if samples.is_empty() {
        return Err(DecodeError::Empty);
    }
    if samples.len() % 2 != 0 {
        return Err(DecodeError::OddSampleCount { len: samples.len() });
    }

    let frames = samples.len() / 2;
    let mut left = Vec::with_capacity(frames);
    let mut right = Vec::with_capacity(frames);
    for frame in samples.chunks_exact(2) {
        left.push(normalize_sample(frame[0]));
        right.push(normalize_sample(frame[1]));
    }

    Ok(Segment::new(left, right, sample_rate))
}
