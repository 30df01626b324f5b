//! Stereo sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! ## Design
//!
//! Chunks arrive at the stream's fixed rate (commonly 44.1 kHz). Many output
//! devices only run at 48 kHz. `StereoRateConverter` bridges that gap on the
//! driver thread, where allocation is allowed, just before samples enter the
//! output ring.
//!
//! When stream rate == device rate, the converter is a plain re-interleave;
//! no rubato session is created at all.
//!
//! ## Usage
//!
//! ```ignore
//! let mut rc = StereoRateConverter::new(44_100, 48_000, 1024)?;
//! let out = rc.process(&seg.left, &seg.right); // interleaved L,R at 48 kHz
//! ```

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{Result, StreamError};

/// Converts planar stereo f32 audio from one fixed rate to interleaved output at another.
pub struct StereoRateConverter {
    /// `None` when from == to (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Accumulation buffers: hold partial input blocks between calls.
    input_left: Vec<f32>,
    input_right: Vec<f32>,
    /// How many input frames rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[2][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl StereoRateConverter {
    /// # Errors
    /// Returns `StreamError::AudioDevice` if rubato fails to initialise.
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<Self> {
        if from_rate == to_rate {
            return Ok(Self {
                resampler: None,
                input_left: Vec::new(),
                input_right: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = to_rate as f64 / from_rate as f64;

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio, no dynamic adjustment
            PolynomialDegree::Cubic,
            chunk_size,
            2,
        )
        .map_err(|e| StreamError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 2];

        tracing::info!(from_rate, to_rate, chunk_size, max_out, "output resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_left: Vec::new(),
            input_right: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Feed one segment's channels, returning interleaved output (may be empty).
    ///
    /// Frames are accumulated until a full `chunk_size` block is available;
    /// any remainder is carried into the next call, so consecutive segments
    /// stay phase-continuous.
    pub fn process(&mut self, left: &[f32], right: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return interleave(left, right);
        };

        self.input_left.extend_from_slice(left);
        self.input_right.extend_from_slice(right);

        let mut result = Vec::new();

        while self.input_left.len() >= self.chunk_size {
            let block = [
                &self.input_left[..self.chunk_size],
                &self.input_right[..self.chunk_size],
            ];

            match resampler.process_into_buffer(&block, &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend(interleave(
                        &self.output_buf[0][..produced],
                        &self.output_buf[1][..produced],
                    ));
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }

            self.input_left.drain(..self.chunk_size);
            self.input_right.drain(..self.chunk_size);
        }

        result
    }

    /// Drop held-back input and filter history, e.g. when a new schedule chain
    /// starts and the tail of the old one must not leak into it.
    pub fn reset(&mut self) {
        self.input_left.clear();
        self.input_right.clear();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }

    /// Returns `true` when no resampling occurs.
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

fn interleave(left: &[f32], right: &[f32]) -> Vec<f32> {
    let mut out = Vec::with_capacity(left.len() * 2);
    for (l, r) in left.iter().zip(right) {
        out.push(*l);
        out.push(*r);
    }
    out
}
