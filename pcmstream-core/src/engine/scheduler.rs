//! Gapless hand-off of queued segments to the sink.
//!
//! Each pass takes everything queued right now and chains start times:
//!
//! ```text
//! start[0]   = previous pass end   (or sink clock if that end already passed)
//! start[k+1] = start[k] + duration[k]
//! ```
//!
//! There is no lookahead beyond the current queue. When fetching falls behind
//! playback, the previous pass end slips into the past, the next pass is
//! re-anchored on the sink clock and the listener hears a gap. That underrun is
//! counted and playback simply continues.

use tracing::debug;

use crate::{audio::AudioSink, buffering::queue::SegmentQueue};

/// Result of one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PassReport {
    pub scheduled: usize,
    /// The pass had to re-anchor on the sink clock after earlier audio ran out.
    pub underrun: bool,
    /// Sink time at which the last scheduled segment ends.
    pub scheduled_until: f64,
}

#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    /// End of the last scheduled segment on the sink clock.
    next_start: Option<f64>,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move every queued segment into the sink. Empty queue → no-op report.
    pub fn drain_pass(&mut self, queue: &mut SegmentQueue, sink: &mut dyn AudioSink) -> PassReport {
        if queue.is_empty() {
            return PassReport {
                scheduled_until: self.next_start.unwrap_or_default(),
                ..PassReport::default()
            };
        }

        let now = sink.current_time();
        let (mut start, underrun) = match self.next_start {
            Some(t) if t >= now => (t, false),
            Some(t) => {
                debug!(
                    late_by_ms = format_args!("{:.1}", (now - t) * 1000.0),
                    "underrun, re-anchoring on sink clock"
                );
                (now, true)
            }
            None => (now, false),
        };

        let mut scheduled = 0usize;
        for segment in queue.drain_all() {
            let duration = segment.duration_secs();
            sink.schedule(segment, start);
            start += duration;
            scheduled += 1;
        }
        self.next_start = Some(start);

        PassReport {
            scheduled,
            underrun,
            scheduled_until: start,
        }
    }
}
