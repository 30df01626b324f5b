//! Shared playback state: the enable flag, the session epoch, and status broadcast.
//!
//! The host thread flips state through `enable`/`disable`; the driver reads
//! `current()` at the top of every iteration and only ever performs the
//! Buffering → Draining transition itself. Every enable bumps the epoch, so a
//! disable + enable pair the driver never observed separately still forces a
//! fresh session.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use crate::{
    error::{Result, StreamError},
    ipc::events::{PlaybackState, StreamStatusEvent},
};

/// Broadcast channel capacity: 256 status events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Control {
    state: PlaybackState,
    epoch: u64,
}

pub struct StatusHub {
    control: Mutex<Control>,
    tx: broadcast::Sender<StreamStatusEvent>,
    seq: AtomicU64,
}

impl Default for StatusHub {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            control: Mutex::new(Control {
                state: PlaybackState::Idle,
                epoch: 0,
            }),
            tx,
            seq: AtomicU64::new(0),
        }
    }

    /// Idle → Buffering. Returns the new session epoch.
    pub fn enable(&self) -> Result<u64> {
        let mut control = self.control.lock();
        if control.state != PlaybackState::Idle {
            return Err(StreamError::AlreadyEnabled);
        }
        control.epoch += 1;
        control.state = PlaybackState::Buffering;
        self.send(control.state, 0, None);
        Ok(control.epoch)
    }

    /// Any state → Idle.
    pub fn disable(&self) -> Result<()> {
        let mut control = self.control.lock();
        if control.state == PlaybackState::Idle {
            return Err(StreamError::NotEnabled);
        }
        control.state = PlaybackState::Idle;
        self.send(control.state, 0, None);
        Ok(())
    }

    /// Buffering → Draining for `epoch`, if that session is still the live one.
    pub fn mark_draining(&self, epoch: u64, queued_segments: usize) -> bool {
        let mut control = self.control.lock();
        if control.epoch != epoch || control.state != PlaybackState::Buffering {
            debug!(epoch, current = control.epoch, "stale draining transition ignored");
            return false;
        }
        control.state = PlaybackState::Draining;
        self.send(control.state, queued_segments, None);
        true
    }

    /// Publish a detail message without changing state (e.g. sink failures).
    pub fn report(&self, detail: String) {
        let control = self.control.lock();
        self.send(control.state, 0, Some(detail));
    }

    /// `(epoch, enabled)` snapshot for the driver.
    pub fn current(&self) -> (u64, bool) {
        let control = self.control.lock();
        (control.epoch, control.state != PlaybackState::Idle)
    }

    pub fn state(&self) -> PlaybackState {
        self.control.lock().state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamStatusEvent> {
        self.tx.subscribe()
    }

    fn send(&self, state: PlaybackState, queued_segments: usize, detail: Option<String>) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let _ = self.tx.send(StreamStatusEvent {
            seq,
            state,
            queued_segments,
            detail,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enable_disable_cycle_bumps_epoch() {
        let hub = StatusHub::new();
        assert_eq!(hub.current(), (0, false));
        assert_eq!(hub.enable().unwrap(), 1);
        assert!(matches!(hub.enable(), Err(StreamError::AlreadyEnabled)));
        hub.disable().unwrap();
        assert!(matches!(hub.disable(), Err(StreamError::NotEnabled)));
        assert_eq!(hub.enable().unwrap(), 2);
        assert_eq!(hub.current(), (2, true));
    }

    #[test]
    fn draining_only_for_live_buffering_session() {
        let hub = StatusHub::new();
        let first = hub.enable().unwrap();
        hub.disable().unwrap();
        let second = hub.enable().unwrap();

        assert!(!hub.mark_draining(first, 40));
        assert_eq!(hub.state(), PlaybackState::Buffering);
        assert!(hub.mark_draining(second, 40));
        assert!(!hub.mark_draining(second, 41));
        assert_eq!(hub.state(), PlaybackState::Draining);
    }

    #[test]
    fn transitions_are_broadcast_in_order() {
        let hub = StatusHub::new();
        let mut rx = hub.subscribe();
        let epoch = hub.enable().unwrap();
        hub.mark_draining(epoch, 40);
        hub.disable().unwrap();

        let states: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| (e.seq, e.state))
            .collect();
        assert_eq!(
            states,
            vec![
                (0, PlaybackState::Buffering),
                (1, PlaybackState::Draining),
                (2, PlaybackState::Idle),
            ]
        );
    }
}
