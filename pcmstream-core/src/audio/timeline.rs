//! Placement of scheduled segments on the device frame timeline.
//!
//! The scheduler chains start times so consecutive segments abut exactly.
//! Resampling does not keep that alignment per segment: the converter holds
//! back a partial input block and its output length wobbles by a frame. A sink
//! that padded every segment out to `round(start_at * rate)` would insert
//! silence between segments meant to be contiguous.
//!
//! `ScheduleChain` pads only when a segment does not continue the previous
//! one, i.e. when the scheduler re-anchored.

/// How the next segment is written relative to the device write cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Silent frames to write before the segment.
    pub pad_frames: u64,
    /// The segment opens a new chain; converter state from the old one is dropped.
    pub reanchor: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleChain {
    /// Stream time at which the last placed segment ends.
    end: Option<f64>,
}

impl ScheduleChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a segment of `duration` seconds requested at `start_at`, given the
    /// device frame the next written sample will land on.
    pub fn place(
        &mut self,
        start_at: f64,
        duration: f64,
        cursor_frames: u64,
        device_rate: u32,
    ) -> Placement {
        let tolerance = 0.5 / device_rate as f64;
        let continues = self
            .end
            .is_some_and(|end| (start_at - end).abs() <= tolerance);
        self.end = Some(start_at + duration);

        if continues {
            return Placement {
                pad_frames: 0,
                reanchor: false,
            };
        }

        // Earlier than the cursor: append at the cursor, nothing to pad.
        let target = (start_at.max(0.0) * device_rate as f64).round() as u64;
        Placement {
            pad_frames: target.saturating_sub(cursor_frames),
            reanchor: true,
        }
    }
}
