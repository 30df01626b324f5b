//! Event types broadcast to engine subscribers.
//!
//! All types serialize as camelCase JSON with lowercase enum values so a
//! control panel can forward them verbatim.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Playback state
// ---------------------------------------------------------------------------

/// Streaming session state.
///
/// ```text
/// Idle ──enable──► Buffering ──backlog reached (once)──► Draining
///   ▲                  │                                    │
///   └──────disable─────┴────────────disable─────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// Streaming disabled; no requests, empty queue.
    Idle,
    /// Fetching and queueing, nothing handed to the sink yet.
    Buffering,
    /// Scheduler is handing queued segments to the sink.
    Draining,
}

/// Emitted whenever the playback state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatusEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    pub state: PlaybackState,
    /// Segments queued at the moment of the transition.
    pub queued_segments: usize,
    /// Optional human-readable detail (e.g. device error).
    pub detail: Option<String>,
}
