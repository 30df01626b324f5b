//! `ToneSource`: local stand-in for a streaming server.
//!
//! Produces consecutive blocks of a continuous stereo sine tone (left and right
//! a fifth apart) so the whole fetch → decode → schedule path can be exercised
//! without a server. `with_repeat_every` makes it re-serve the previous block
//! periodically, the way a server polled faster than it produces audio does.

use std::f64::consts::TAU;

use tracing::debug;

use crate::error::Result;
use crate::source::ChunkSource;

pub struct ToneSource {
    sample_rate: u32,
    frames_per_chunk: usize,
    frequency_hz: f64,
    amplitude: f64,
    phase: f64,
    served: u64,
    repeat_every: Option<u64>,
    last: Vec<u8>,
}

impl ToneSource {
    pub fn new(sample_rate: u32, frames_per_chunk: usize, frequency_hz: f64) -> Self {
        Self {
            sample_rate,
            frames_per_chunk,
            frequency_hz,
            amplitude: 0.25,
            phase: 0.0,
            served: 0,
            repeat_every: None,
            last: Vec::new(),
        }
    }

    /// Every `n`-th response repeats the previous one verbatim.
    pub fn with_repeat_every(mut self, n: u64) -> Self {
        self.repeat_every = (n > 1).then_some(n);
        self
    }

    fn next_block(&mut self) -> Vec<u8> {
        let step = TAU * self.frequency_hz / self.sample_rate as f64;
        let mut out = Vec::with_capacity(self.frames_per_chunk * 4);
        for _ in 0..self.frames_per_chunk {
            let l = (self.phase.sin() * self.amplitude * i16::MAX as f64) as i16;
            let r = ((self.phase * 1.5).sin() * self.amplitude * i16::MAX as f64) as i16;
            out.extend_from_slice(&l.to_le_bytes());
            out.extend_from_slice(&r.to_le_bytes());
            // Keep phase bounded so 1.5x stays continuous across wraps (lcm of both periods).
            self.phase = (self.phase + step) % (2.0 * TAU);
        }
        out
    }
}

impl ChunkSource for ToneSource {
    fn fetch_chunk(&mut self) -> Result<Vec<u8>> {
        self.served += 1;
        let repeat = self
            .repeat_every
            .is_some_and(|n| self.served % n == 0 && !self.last.is_empty());

        if repeat {
            debug!(served = self.served, "ToneSource repeating previous block");
        } else {
            self.last = self.next_block();
        }
        Ok(self.last.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::samples_from_le_bytes;

    #[test]
    fn blocks_are_stereo_and_sized() {
        let mut src = ToneSource::new(48_000, 480, 440.0);
        let body = src.fetch_chunk().unwrap();
        assert_eq!(body.len(), 480 * 4);
        let chunk = samples_from_le_bytes(&body).unwrap();
        assert_eq!(chunk.len(), 960);
    }

    #[test]
    fn consecutive_blocks_differ() {
        let mut src = ToneSource::new(48_000, 480, 440.0);
        let a = src.fetch_chunk().unwrap();
        let b = src.fetch_chunk().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn repeat_every_reserves_previous_block() {
        let mut src = ToneSource::new(8_000, 100, 330.0).with_repeat_every(3);
        let a = src.fetch_chunk().unwrap();
        let b = src.fetch_chunk().unwrap();
        let c = src.fetch_chunk().unwrap();
        let d = src.fetch_chunk().unwrap();
        assert_ne!(a, b);
        assert_eq!(b, c);
        assert_ne!(c, d);
    }
}
