//! Audio chunk source abstraction.
//!
//! The `ChunkSource` trait decouples the fetch loop from the transport
//! (HTTP polling, a local tone generator, scripted test sources).
//!
//! `fetch_chunk` takes `&mut self` because sources may keep per-stream state
//! (connection pools, generator phase). All calls are serialised through
//! `SourceHandle`'s `parking_lot::Mutex`, and the fetch loop never has more
//! than one call in flight.

#[cfg(feature = "http")]
pub mod http;
pub mod stub;

#[cfg(feature = "http")]
pub use http::{HttpChunkSource, HttpSourceConfig, RequestMethod};
pub use stub::ToneSource;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

/// Contract for anything that can hand out the next raw audio block.
pub trait ChunkSource: Send + 'static {
    /// Request the next chunk and return its body.
    ///
    /// The body is a flat little-endian i16 interleaved stereo sequence with
    /// no header. An empty body is a valid answer ("nothing new yet").
    ///
    /// # Errors
    /// Any transport-level failure. The fetch loop backs off and retries.
    fn fetch_chunk(&mut self) -> Result<Vec<u8>>;
}

/// Thread-safe reference-counted handle to any `ChunkSource` implementor.
#[derive(Clone)]
pub struct SourceHandle(pub Arc<Mutex<dyn ChunkSource>>);

impl SourceHandle {
    /// Wrap any `ChunkSource` in a `SourceHandle`.
    pub fn new<S: ChunkSource>(source: S) -> Self {
        Self(Arc::new(Mutex::new(source)))
    }

    pub fn fetch_chunk(&self) -> Result<Vec<u8>> {
        self.0.lock().fetch_chunk()
    }
}

impl std::fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceHandle").finish_non_exhaustive()
    }
}
