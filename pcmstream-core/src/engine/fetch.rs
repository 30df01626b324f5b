//! Single-in-flight fetch loop.
//!
//! ```text
//!  driver ──request(epoch)──► fetch worker ──source.fetch_chunk()──┐
//!    ▲                                                              │
//!    └──────────────── completion(epoch, result) ◄──────────────────┘
//! ```
//!
//! The driver never issues a second request before the previous completion has
//! come back, so completions arrive in request order. Each request carries the
//! session epoch; a completion from an earlier session is dropped on arrival.
//! Transport failures push the next request out by a bounded exponential
//! backoff instead of retrying in a tight loop.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::{error::Result, source::SourceHandle};

/// A finished request, tagged with the session it was issued for.
#[derive(Debug)]
pub struct FetchCompletion {
    pub epoch: u64,
    pub result: Result<Vec<u8>>,
}

/// Outcome of one bounded wait on the fetch worker.
#[derive(Debug)]
pub enum FetchWait {
    Completed(FetchCompletion),
    /// The outstanding request finished for an earlier session.
    Stale,
    /// Nothing arrived, or nothing was outstanding.
    Idle,
    /// The worker thread is gone; no further requests can be served.
    Disconnected,
}

/// Doubling retry delay between `base` and `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: 0,
        }
    }

    /// Register a failure and return how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32 << self.failures.min(16);
        self.failures = self.failures.saturating_add(1);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

pub struct FetchLoop {
    request_tx: Sender<u64>,
    completion_rx: Receiver<FetchCompletion>,
    _worker: JoinHandle<()>,
    /// Epoch of the request currently outstanding, if any.
    in_flight: Option<u64>,
    epoch: u64,
    backoff: Backoff,
    retry_at: Option<Instant>,
}

impl FetchLoop {
    /// Start the fetch worker thread for `source`.
    ///
    /// # Errors
    /// Returns `StreamError::Io` if the worker thread cannot be spawned.
    pub fn spawn(source: SourceHandle, backoff: Backoff) -> Result<Self> {
        // Capacity 1 on both sides: there is never more than one request around.
        let (request_tx, request_rx) = bounded::<u64>(1);
        let (completion_tx, completion_rx) = bounded::<FetchCompletion>(1);

        let worker = thread::Builder::new()
            .name("pcmstream-fetch".into())
            .spawn(move || {
                for epoch in request_rx.iter() {
                    let result = source.fetch_chunk();
                    if completion_tx.send(FetchCompletion { epoch, result }).is_err() {
                        break;
                    }
                }
                debug!("fetch worker exiting");
            })?;

        Ok(Self {
            request_tx,
            completion_rx,
            _worker: worker,
            in_flight: None,
            epoch: 0,
            backoff,
            retry_at: None,
        })
    }

    /// Switch to a new session. Any outstanding request stays outstanding (and
    /// blocks new ones) but its result will be discarded.
    pub fn begin_session(&mut self, epoch: u64) {
        self.epoch = epoch;
        self.retry_at = None;
        self.backoff.reset();
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Issue the next request if enabled, nothing is outstanding and no retry
    /// delay is pending. Returns `true` when a request went out.
    pub fn poll(&mut self, enabled: bool) -> bool {
        if !enabled || self.in_flight.is_some() {
            return false;
        }
        if let Some(at) = self.retry_at {
            if Instant::now() < at {
                return false;
            }
            self.retry_at = None;
        }

        match self.request_tx.try_send(self.epoch) {
            Ok(()) => {
                self.in_flight = Some(self.epoch);
                true
            }
            Err(e) => {
                warn!("fetch worker unavailable: {e}");
                false
            }
        }
    }

    /// Wait up to `timeout` for the outstanding request. When nothing is
    /// outstanding this sleeps out the pending retry delay instead.
    pub fn wait_completion(&mut self, timeout: Duration) -> FetchWait {
        if self.in_flight.is_none() {
            let nap = match self.retry_at {
                Some(at) => at.saturating_duration_since(Instant::now()).min(timeout),
                None => timeout,
            };
            if !nap.is_zero() {
                thread::sleep(nap);
            }
            return FetchWait::Idle;
        }

        match self.completion_rx.recv_timeout(timeout) {
            Ok(completion) => {
                self.in_flight = None;
                if completion.epoch != self.epoch {
                    debug!(
                        stale = completion.epoch,
                        current = self.epoch,
                        "discarding completion from earlier session"
                    );
                    return FetchWait::Stale;
                }
                FetchWait::Completed(completion)
            }
            Err(RecvTimeoutError::Timeout) => FetchWait::Idle,
            Err(RecvTimeoutError::Disconnected) => {
                self.in_flight = None;
                FetchWait::Disconnected
            }
        }
    }

    /// Record the outcome of a current-session completion and return the retry
    /// delay applied, if any.
    pub fn settle(&mut self, result: &Result<Vec<u8>>) -> Option<Duration> {
        match result {
            Ok(_) => {
                self.backoff.reset();
                None
            }
            Err(_) => {
                let delay = self.backoff.next_delay();
                self.retry_at = Some(Instant::now() + delay);
                Some(delay)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;
    use crate::source::ChunkSource;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    struct CountingSource {
        calls: Arc<AtomicUsize>,
        fail: bool,
        delay: Duration,
    }

    impl ChunkSource for CountingSource {
        fn fetch_chunk(&mut self) -> Result<Vec<u8>> {
            thread::sleep(self.delay);
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(StreamError::Transport("refused".into()))
            } else {
                Ok(vec![n as u8, 0])
            }
        }
    }

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_millis(10), Duration::from_millis(40))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = backoff();
        assert_eq!(b.next_delay(), Duration::from_millis(10));
        assert_eq!(b.next_delay(), Duration::from_millis(20));
        assert_eq!(b.next_delay(), Duration::from_millis(40));
        assert_eq!(b.next_delay(), Duration::from_millis(40));
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_millis(10));
    }

    #[test]
    fn only_one_request_outstanding() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = SourceHandle::new(CountingSource {
            calls: Arc::clone(&calls),
            fail: false,
            delay: Duration::from_millis(30),
        });
        let mut fetch = FetchLoop::spawn(source, backoff()).unwrap();
        fetch.begin_session(1);

        assert!(fetch.poll(true));
        assert!(!fetch.poll(true));
        assert!(fetch.in_flight());

        let FetchWait::Completed(done) = fetch.wait_completion(Duration::from_secs(1)) else {
            panic!("expected a completion");
        };
        assert_eq!(done.epoch, 1);
        assert_eq!(done.result.unwrap(), vec![0, 0]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(fetch.poll(true));
    }

    #[test]
    fn disabled_poll_issues_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = SourceHandle::new(CountingSource {
            calls: Arc::clone(&calls),
            fail: false,
            delay: Duration::ZERO,
        });
        let mut fetch = FetchLoop::spawn(source, backoff()).unwrap();
        assert!(!fetch.poll(false));
        assert!(matches!(fetch.wait_completion(Duration::from_millis(5)), FetchWait::Idle));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stale_completion_is_discarded_after_session_change() {
        let source = SourceHandle::new(CountingSource {
            calls: Arc::new(AtomicUsize::new(0)),
            fail: false,
            delay: Duration::from_millis(20),
        });
        let mut fetch = FetchLoop::spawn(source, backoff()).unwrap();
        fetch.begin_session(1);
        assert!(fetch.poll(true));
        fetch.begin_session(2);
        // Still blocked by the earlier request.
        assert!(!fetch.poll(true));
        assert!(matches!(fetch.wait_completion(Duration::from_secs(1)), FetchWait::Stale));
        assert!(!fetch.in_flight());
        assert!(fetch.poll(true));
        let FetchWait::Completed(done) = fetch.wait_completion(Duration::from_secs(1)) else {
            panic!("expected a completion");
        };
        assert_eq!(done.epoch, 2);
    }

    #[test]
    fn transport_failure_delays_next_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = SourceHandle::new(CountingSource {
            calls: Arc::clone(&calls),
            fail: true,
            delay: Duration::ZERO,
        });
        let mut fetch = FetchLoop::spawn(source, backoff()).unwrap();
        fetch.begin_session(1);

        assert!(fetch.poll(true));
        let FetchWait::Completed(done) = fetch.wait_completion(Duration::from_secs(1)) else {
            panic!("expected a completion");
        };
        assert_eq!(fetch.settle(&done.result), Some(Duration::from_millis(10)));
        assert!(!fetch.poll(true), "retry must wait for the backoff");

        // wait_completion sleeps out the backoff when idle.
        assert!(matches!(fetch.wait_completion(Duration::from_millis(50)), FetchWait::Idle));
        assert!(fetch.poll(true));
    }

    struct PanickingSource;

    impl ChunkSource for PanickingSource {
        fn fetch_chunk(&mut self) -> Result<Vec<u8>> {
            panic!("source blew up");
        }
    }

    #[test]
    fn dead_worker_is_reported_as_disconnected() {
        let mut fetch = FetchLoop::spawn(SourceHandle::new(PanickingSource), backoff()).unwrap();
        fetch.begin_session(1);
        assert!(fetch.poll(true));
        assert!(matches!(
            fetch.wait_completion(Duration::from_secs(1)),
            FetchWait::Disconnected
        ));
        assert!(!fetch.in_flight());
    }
}
