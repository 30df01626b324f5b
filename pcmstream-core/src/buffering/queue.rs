//! FIFO of decoded segments awaiting the playback scheduler.
//!
//! Insertion order is playback order. No reordering and no deduplication
//! happen here; duplicates are filtered on raw chunks before decoding.

use std::collections::VecDeque;

use super::chunk::Segment;

#[derive(Debug, Default)]
pub struct SegmentQueue {
    segments: VecDeque<Segment>,
}

impl SegmentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, segment: Segment) {
        self.segments.push_back(segment);
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Total queued audio in seconds.
    pub fn backlog_secs(&self) -> f64 {
        self.segments.iter().map(Segment::duration_secs).sum()
    }

    /// Remove everything currently queued, oldest first.
    pub fn drain_all(&mut self) -> std::collections::vec_deque::Drain<'_, Segment> {
        self.segments.drain(..)
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }
}
