//! Typed audio blocks passed between the fetch, decode and schedule stages.

/// One server response interpreted as interleaved stereo i16 samples (L,R,L,R,…).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawChunk {
    pub samples: Vec<i16>,
}

impl RawChunk {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if the chunk contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A decoded stereo block of equal-length, normalized f32 channels.
///
/// Allocated once per accepted chunk on the driver thread.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Left channel samples in [-1.0, 1.0].
    pub left: Vec<f32>,
    /// Right channel samples in [-1.0, 1.0].
    pub right: Vec<f32>,
    /// Sample rate in Hz, inherited from the engine configuration.
    pub sample_rate: u32,
}

impl Segment {
    pub fn new(left: Vec<f32>, right: Vec<f32>, sample_rate: u32) -> Self {
        debug_assert_eq!(left.len(), right.len());
        Self {
            left,
            right,
            sample_rate,
        }
    }

    /// Frames per channel.
    pub fn frames(&self) -> usize {
        self.left.len()
    }

    /// Returns the duration of this segment in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Re-interleave into L,R,L,R,… order for output devices.
    pub fn interleaved(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.frames() * 2);
        for (l, r) in self.left.iter().zip(&self.right) {
            out.push(*l);
            out.push(*r);
        }
        out
    }
}
