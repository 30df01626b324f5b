//! Streaming session: everything that lives between one enable and the next disable.
//!
//! A session owns the segment queue, the duplicate detector, the backlog gate
//! and the scheduler cursor. Dropping it is the reset: a new enable builds a
//! fresh one, so a re-enabled stream must collect a full backlog again.

use tracing::{debug, info};

use crate::{
    buffering::{chunk::RawChunk, queue::SegmentQueue},
    decode::decode_interleaved,
    dedup::{DedupDecision, DuplicateDetector},
    engine::scheduler::PlaybackScheduler,
    error::DecodeError,
    ipc::events::PlaybackState,
};

/// One-shot Buffering → Draining gate.
#[derive(Debug)]
pub struct BacklogGate {
    threshold: usize,
    state: PlaybackState,
}

impl BacklogGate {
    /// A gate for a freshly enabled session (state `Buffering`).
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            state: PlaybackState::Buffering,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Report the queue length after an enqueue. Returns `true` exactly once:
    /// the first time the queue reaches the threshold.
    pub fn on_enqueued(&mut self, queue_len: usize) -> bool {
        if self.state == PlaybackState::Buffering && queue_len >= self.threshold {
            self.state = PlaybackState::Draining;
            return true;
        }
        false
    }
}

/// What happened to one fetched chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Decoded and queued. `started` is true when this enqueue opened the gate.
    Enqueued { queue_len: usize, started: bool },
    /// Same as the last accepted chunk while audio was still queued.
    Duplicate,
    /// Zero-length response; nothing to do.
    Empty,
    /// Could not be decoded; discarded.
    Malformed(DecodeError),
}

pub struct StreamingSession {
    sample_rate: u32,
    queue: SegmentQueue,
    detector: DuplicateDetector,
    gate: BacklogGate,
    scheduler: PlaybackScheduler,
}

impl StreamingSession {
    pub fn new(sample_rate: u32, backlog_threshold: usize) -> Self {
        info!(sample_rate, backlog_threshold, "streaming session created");
        Self {
            sample_rate,
            queue: SegmentQueue::new(),
            detector: DuplicateDetector::new(),
            gate: BacklogGate::new(backlog_threshold),
            scheduler: PlaybackScheduler::new(),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.gate.state()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn last_accepted(&self) -> Option<&RawChunk> {
        self.detector.last_accepted()
    }

    /// Run one raw chunk through dedup → decode → queue → gate.
    pub fn ingest(&mut self, chunk: RawChunk) -> IngestOutcome {
        if chunk.is_empty() {
            return IngestOutcome::Empty;
        }

        if self.detector.check(&chunk, self.queue.is_empty()) == DedupDecision::Duplicate {
            debug!(samples = chunk.len(), "duplicate chunk dropped");
            return IngestOutcome::Duplicate;
        }

        let segment = match decode_interleaved(&chunk.samples, self.sample_rate) {
            Ok(segment) => segment,
            Err(e) => return IngestOutcome::Malformed(e),
        };

        self.queue.push(segment);
        let queue_len = self.queue.len();
        let started = self.gate.on_enqueued(queue_len);
        if started {
            info!(
                queue_len,
                backlog_secs = format_args!("{:.3}", self.queue.backlog_secs()),
                "backlog reached, draining"
            );
        }
        IngestOutcome::Enqueued { queue_len, started }
    }

    /// Split borrow for the scheduler: `Some` only while draining.
    pub fn drain_parts(&mut self) -> Option<(&mut PlaybackScheduler, &mut SegmentQueue)> {
        if self.gate.state() == PlaybackState::Draining {
            Some((&mut self.scheduler, &mut self.queue))
        } else {
            None
        }
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        debug!(discarded = self.queue.len(), "streaming session torn down");
    }
}
