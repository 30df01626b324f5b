//! Duplicate / stale chunk suppression.
//!
//! Servers that publish "the current block" will happily return the same
//! block twice when polled faster than they produce audio. A chunk equal to the
//! last accepted one is dropped, but only while the queue still has audio in
//! it: with an empty queue the repeat is accepted so a stream resuming from an
//! idle server can never stall.

use crate::buffering::chunk::RawChunk;

/// Whether an incoming chunk should be decoded and enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    Accept,
    Duplicate,
}

#[derive(Debug, Default)]
pub struct DuplicateDetector {
    last_accepted: Option<RawChunk>,
}

impl DuplicateDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `chunk`. On `Accept` it becomes the new last-accepted chunk;
    /// on `Duplicate` nothing changes.
    pub fn check(&mut self, chunk: &RawChunk, queue_is_empty: bool) -> DedupDecision {
        let repeats_last = self
            .last_accepted
            .as_ref()
            .is_some_and(|last| last.samples == chunk.samples);

        if repeats_last && !queue_is_empty {
            return DedupDecision::Duplicate;
        }

        self.last_accepted = Some(chunk.clone());
        DedupDecision::Accept
    }

    pub fn last_accepted(&self) -> Option<&RawChunk> {
        self.last_accepted.as_ref()
    }

    pub fn reset(&mut self) {
        self.last_accepted = None;
    }
}
