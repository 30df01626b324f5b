//! `StreamingEngine`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! StreamingEngine::new()
//!     └─► enable()           → driver spawned (first time), sink opened, Buffering
//!         └─► (backlog)      → Draining
//!             └─► disable()  → session torn down, Idle; sink stays open
//!                 └─► shutdown() → driver exits, sink dropped on its thread
//! ```
//!
//! `enable()`/`disable()` return an error in the wrong state rather than
//! panicking.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread affinity).
//! The sink is therefore opened *inside* the driver's `spawn_blocking` closure
//! so it never crosses a thread boundary. A sync oneshot channel propagates any
//! open-device errors back to the `enable()` caller.

pub mod fetch;
pub mod pipeline;
pub mod scheduler;
pub mod session;
pub mod status;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    audio::SinkFactory,
    error::{Result, StreamError},
    ipc::events::{PlaybackState, StreamStatusEvent},
    source::SourceHandle,
};
use status::StatusHub;

/// Configuration for `StreamingEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Sample rate of the incoming PCM stream (Hz). The wire format carries no
    /// header, so this must match the server. Default: 44100.
    pub sample_rate: u32,
    /// Queued segments needed before playback starts. Default: 40.
    pub backlog_threshold: usize,
    /// First retry delay after a failed request. Default: 100.
    pub retry_base_delay_ms: u64,
    /// Retry delay cap. Default: 2000.
    pub retry_max_delay_ms: u64,
    /// Upper bound on one driver wait; also how quickly enable/disable is
    /// noticed. Default: 20.
    pub idle_poll_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            backlog_threshold: 40,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 2_000,
            idle_poll_ms: 20,
        }
    }
}

/// A started driver: its run flag and a channel that disconnects once the
/// driver thread has released the sink and returned.
struct DriverHandle {
    alive: Arc<AtomicBool>,
    exited: Receiver<()>,
}

impl DriverHandle {
    fn is_running(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Block until the driver thread has finished.
    fn wait_exited(&self) {
        // Only ever disconnects; nothing is sent.
        let _ = self.exited.recv();
    }
}

/// The top-level engine handle.
///
/// `StreamingEngine` is `Send + Sync`: all fields use interior mutability.
/// Wrap in `Arc<StreamingEngine>` to share with status-forwarding tasks.
pub struct StreamingEngine {
    config: EngineConfig,
    source: SourceHandle,
    sink_factory: SinkFactory,
    hub: Arc<StatusHub>,
    /// Most recently started driver, kept after shutdown until the next start
    /// has waited for it.
    driver: Mutex<Option<DriverHandle>>,
    /// Shared pipeline diagnostics counters.
    diagnostics: Arc<pipeline::PipelineDiagnostics>,
}

impl StreamingEngine {
    /// Create a new engine. Nothing is opened or requested until `enable()`.
    pub fn new(config: EngineConfig, source: SourceHandle, sink_factory: SinkFactory) -> Self {
        Self {
            config,
            source,
            sink_factory,
            hub: Arc::new(StatusHub::new()),
            driver: Mutex::new(None),
            diagnostics: Arc::new(pipeline::PipelineDiagnostics::default()),
        }
    }

    /// Start streaming: Idle → Buffering.
    ///
    /// The first call (and the first call after `shutdown()`) also starts the
    /// driver and blocks until the sink is confirmed open.
    ///
    /// # Errors
    /// - `StreamError::AlreadyEnabled` if streaming is already on.
    /// - `StreamError::NoDefaultOutputDevice` / `StreamError::AudioStream` on device error.
    pub fn enable(&self) -> Result<()> {
        if self.hub.state() != PlaybackState::Idle {
            return Err(StreamError::AlreadyEnabled);
        }
        self.ensure_driver()?;
        let epoch = self.hub.enable()?;
        info!(epoch, "streaming enabled, buffering");
        Ok(())
    }

    /// Stop streaming: any state → Idle. Queued audio is discarded; audio
    /// already handed to the sink plays out.
    ///
    /// # Errors
    /// - `StreamError::NotEnabled` if streaming is off.
    pub fn disable(&self) -> Result<()> {
        self.hub.disable()?;
        info!("streaming disabled");
        Ok(())
    }

    /// Disable (if needed) and stop the driver thread, closing the sink.
    pub fn shutdown(&self) {
        let _ = self.hub.disable();
        if let Some(driver) = self.driver.lock().as_ref() {
            if driver.alive.swap(false, Ordering::SeqCst) {
                info!("engine shutdown requested");
            }
        }
    }

    /// Current playback state (snapshot).
    pub fn state(&self) -> PlaybackState {
        self.hub.state()
    }

    /// Subscribe to playback state transitions.
    pub fn subscribe_status(&self) -> broadcast::Receiver<StreamStatusEvent> {
        self.hub.subscribe()
    }

    /// Snapshot of pipeline counters for observability.
    pub fn pipeline_diagnostics_snapshot(&self) -> pipeline::DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn ensure_driver(&self) -> Result<()> {
        let mut driver = self.driver.lock();
        if let Some(previous) = driver.take() {
            if previous.is_running() {
                *driver = Some(previous);
                return Ok(());
            }
            // A stopping driver still reads the hub; two must never overlap.
            previous.wait_exited();
        }

        self.diagnostics.reset();
        let alive = Arc::new(AtomicBool::new(true));

        // Clone all Arc-wrapped state before moving into the closure.
        let config = self.config.clone();
        let source = self.source.clone();
        let factory = Arc::clone(&self.sink_factory);
        let hub = Arc::clone(&self.hub);
        let diagnostics = Arc::clone(&self.diagnostics);
        let task_alive = Arc::clone(&alive);

        // Sync oneshot: driver thread signals sink open success/failure.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<()>>();
        let (exit_tx, exit_rx) = crossbeam_channel::bounded::<()>(0);

        let task = move || {
            // Dropped last, after the sink, on every exit path.
            let _exit = exit_tx;

            // ── Open sink (must happen on THIS thread; cpal::Stream is !Send) ──
            let sink = match factory() {
                Ok(sink) => {
                    let _ = open_tx.send(Ok(()));
                    sink
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    task_alive.store(false, Ordering::SeqCst);
                    return;
                }
            };

            pipeline::run(pipeline::PipelineContext {
                config,
                source,
                sink,
                alive: Arc::clone(&task_alive),
                hub,
                diagnostics,
            });

            // Sink drops inside run(), releasing the device on this thread.
            task_alive.store(false, Ordering::SeqCst);
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(task);
            }
            Err(_) => {
                std::thread::Builder::new()
                    .name("pcmstream-driver".into())
                    .spawn(task)?;
            }
        }

        // Block until sink open is confirmed.
        match open_rx.recv() {
            Ok(Ok(())) => {
                *driver = Some(DriverHandle {
                    alive,
                    exited: exit_rx,
                });
                info!("pipeline driver started");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("failed to open audio sink: {e}");
                self.hub.report(format!("audio sink failed to open: {e}"));
                Err(e)
            }
            Err(_) => {
                // Channel closed before a message was sent: the driver panicked.
                self.hub.report("pipeline failed to start".into());
                Err(StreamError::Other(anyhow::anyhow!(
                    "pipeline driver died unexpectedly"
                )))
            }
        }
    }
}

impl Drop for StreamingEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioSink;
    use crate::buffering::chunk::Segment;
    use crate::source::ChunkSource;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    struct SilentSource;

    impl ChunkSource for SilentSource {
        fn fetch_chunk(&mut self) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    struct NullSink;

    impl AudioSink for NullSink {
        fn current_time(&self) -> f64 {
            0.0
        }

        fn schedule(&mut self, _segment: Segment, _start_at: f64) {}
    }

    fn engine_with(factory: SinkFactory) -> StreamingEngine {
        let config = EngineConfig { idle_poll_ms: 2, ..EngineConfig::default() };
        StreamingEngine::new(config, SourceHandle::new(SilentSource), factory)
    }

    fn wait_for(what: &str, cond: impl Fn() -> bool) {
        let start = Instant::now();
        while !cond() {
            assert!(start.elapsed() < Duration::from_secs(5), "timed out waiting for {what}");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn default_config_matches_stream_contract() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.sample_rate, 44_100);
        assert_eq!(cfg.backlog_threshold, 40);
        assert!(cfg.retry_base_delay_ms <= cfg.retry_max_delay_ms);
    }

    #[test]
    fn enable_disable_errors_in_wrong_state() {
        let engine = engine_with(Arc::new(|| Ok(Box::new(NullSink) as Box<dyn AudioSink>)));
        assert!(matches!(engine.disable(), Err(StreamError::NotEnabled)));

        engine.enable().unwrap();
        assert_eq!(engine.state(), PlaybackState::Buffering);
        assert!(matches!(engine.enable(), Err(StreamError::AlreadyEnabled)));

        engine.disable().unwrap();
        assert_eq!(engine.state(), PlaybackState::Idle);
        engine.shutdown();
    }

    #[test]
    fn sink_is_opened_once_across_sessions() {
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opened);
        let engine = engine_with(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(NullSink) as Box<dyn AudioSink>)
        }));

        for _ in 0..3 {
            engine.enable().unwrap();
            wait_for("requests", || engine.pipeline_diagnostics_snapshot().requests_issued > 0);
            engine.disable().unwrap();
        }
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert!(engine.pipeline_diagnostics_snapshot().sessions_started >= 1);
    }

    #[test]
    fn sink_open_failure_is_returned_and_state_stays_idle() {
        let engine = engine_with(Arc::new(|| Err(StreamError::NoDefaultOutputDevice)));
        let mut status = engine.subscribe_status();

        assert!(matches!(engine.enable(), Err(StreamError::NoDefaultOutputDevice)));
        assert_eq!(engine.state(), PlaybackState::Idle);
        let event = status.try_recv().expect("failure reported");
        assert!(event.detail.unwrap().contains("no default output device"));
    }

    /// Counts live sinks so overlapping drivers become visible.
    struct TrackedSink {
        live: Arc<AtomicUsize>,
    }

    impl AudioSink for TrackedSink {
        fn current_time(&self) -> f64 {
            0.0
        }

        fn schedule(&mut self, _segment: Segment, _start_at: f64) {}
    }

    impl Drop for TrackedSink {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn restart_after_shutdown_waits_for_previous_driver() {
        let live = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicBool::new(false));
        let (counter, flag) = (Arc::clone(&live), Arc::clone(&overlapped));
        let engine = engine_with(Arc::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) != 0 {
                flag.store(true, Ordering::SeqCst);
            }
            Ok(Box::new(TrackedSink { live: Arc::clone(&counter) }) as Box<dyn AudioSink>)
        }));

        for _ in 0..5 {
            engine.enable().unwrap();
            engine.shutdown();
        }
        engine.enable().unwrap();

        assert!(!overlapped.load(Ordering::SeqCst), "two drivers held a sink at once");
        assert_eq!(live.load(Ordering::SeqCst), 1);
        engine.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn enable_runs_driver_on_tokio_blocking_pool() {
        let engine = engine_with(Arc::new(|| Ok(Box::new(NullSink) as Box<dyn AudioSink>)));
        let mut status = engine.subscribe_status();
        engine.enable().unwrap();

        let event = status.recv().await.unwrap();
        assert_eq!(event.state, PlaybackState::Buffering);
        engine.shutdown();
        assert_eq!(engine.state(), PlaybackState::Idle);
    }
}
