//! # pcmstream-core
//!
//! Live PCM streaming playback engine.
//!
//! ## Architecture
//!
//! ```text
//! ChunkSource ─► FetchLoop(worker) ─► Pipeline(spawn_blocking)
//!                                          │
//!                          dedup → decode → SegmentQueue → BacklogGate
//!                                          │
//!                               PlaybackScheduler::drain_pass
//!                                          │
//!                          AudioSink (CpalSink → SPSC ring → output callback)
//! ```
//!
//! One request is outstanding at a time, so request order, enqueue order and
//! playback order are the same. The output callback is zero-alloc once its
//! scratch buffer has grown to the device period.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod decode;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod source;

// Convenience re-exports for downstream crates
pub use audio::{device::DeviceInfo, AudioSink, CpalSink, SinkFactory};
pub use buffering::chunk::{RawChunk, Segment};
pub use engine::{pipeline::DiagnosticsSnapshot, EngineConfig, StreamingEngine};
pub use error::{DecodeError, StreamError};
pub use ipc::events::{PlaybackState, StreamStatusEvent};
pub use source::{ChunkSource, SourceHandle, ToneSource};

#[cfg(feature = "http")]
pub use source::{HttpChunkSource, HttpSourceConfig, RequestMethod};
