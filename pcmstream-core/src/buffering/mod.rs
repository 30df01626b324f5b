//! Buffers between the pipeline stages.
//!
//! - [`queue::SegmentQueue`]: decoded segments waiting for the scheduler (driver thread only).
//! - Output ring: lock-free SPSC `ringbuf::HeapRb<f32>` of interleaved stereo samples,
//!   written by the scheduler through the sink and drained by the real-time output callback.

pub mod chunk;
pub mod queue;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Type alias for the producer half, held by the sink on the driver thread.
pub type OutputProducer = ringbuf::HeapProd<f32>;

/// Type alias for the consumer half, held by the audio output callback.
pub type OutputConsumer = ringbuf::HeapCons<f32>;

/// Buffer capacity: 2^22 = 4 194 304 f32 samples ≈ 43.7 s of stereo at 48 kHz.
/// Large enough that a full startup backlog of typical chunks never overflows.
pub const RING_CAPACITY: usize = 1 << 22;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_output_ring() -> (OutputProducer, OutputConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}
