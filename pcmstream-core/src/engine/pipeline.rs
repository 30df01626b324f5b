//! Blocking pipeline driver.
//!
//! ## Per iteration
//!
//! ```text
//! 0. Exit if the driver was shut down
//! 1. Reconcile with the status hub: tear down the session on disable or a
//!    new epoch, build a fresh one when enabled without a session
//! 2. Fetch loop: issue the next request if none is outstanding
//! 3. Wait (bounded) for the completion; bytes → RawChunk → session.ingest
//! 4. First time the backlog is reached: Buffering → Draining on the hub
//! 5. While Draining: one scheduler pass over whatever is queued
//! ```
//!
//! This entire loop runs in `spawn_blocking`, keeping the Tokio async
//! executor free for status forwarding and signal handling.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    audio::AudioSink,
    decode::samples_from_le_bytes,
    engine::{
        fetch::{Backoff, FetchCompletion, FetchLoop, FetchWait},
        session::{IngestOutcome, StreamingSession},
        status::StatusHub,
        EngineConfig,
    },
    source::SourceHandle,
};

#[derive(Default)]
pub struct PipelineDiagnostics {
    pub requests_issued: AtomicUsize,
    pub chunks_accepted: AtomicUsize,
    pub duplicates_dropped: AtomicUsize,
    pub empty_chunks: AtomicUsize,
    pub decode_failures: AtomicUsize,
    pub transport_failures: AtomicUsize,
    pub stale_completions: AtomicUsize,
    pub scheduler_passes: AtomicUsize,
    pub segments_scheduled: AtomicUsize,
    pub underruns: AtomicUsize,
    pub sessions_started: AtomicUsize,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            requests_issued: self.requests_issued.load(Ordering::Relaxed),
            chunks_accepted: self.chunks_accepted.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            empty_chunks: self.empty_chunks.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            stale_completions: self.stale_completions.load(Ordering::Relaxed),
            scheduler_passes: self.scheduler_passes.load(Ordering::Relaxed),
            segments_scheduled: self.segments_scheduled.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
        }
    }

    fn counters(&self) -> [&AtomicUsize; 11] {
        [
            &self.requests_issued,
            &self.chunks_accepted,
            &self.duplicates_dropped,
            &self.empty_chunks,
            &self.decode_failures,
            &self.transport_failures,
            &self.stale_completions,
            &self.scheduler_passes,
            &self.segments_scheduled,
            &self.underruns,
            &self.sessions_started,
        ]
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub requests_issued: usize,
    pub chunks_accepted: usize,
    pub duplicates_dropped: usize,
    pub empty_chunks: usize,
    pub decode_failures: usize,
    pub transport_failures: usize,
    pub stale_completions: usize,
    pub scheduler_passes: usize,
    pub segments_scheduled: usize,
    pub underruns: usize,
    pub sessions_started: usize,
}

/// All context the pipeline needs, passed as one struct so the closure stays tidy.
pub struct PipelineContext {
    pub config: EngineConfig,
    pub source: SourceHandle,
    pub sink: Box<dyn AudioSink>,
    /// Driver keeps looping while this is `true`.
    pub alive: Arc<AtomicBool>,
    pub hub: Arc<StatusHub>,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

/// Run the blocking pipeline until `ctx.alive` becomes false.
pub fn run(mut ctx: PipelineContext) {
    info!("pipeline started");

    let backoff = Backoff::new(
        Duration::from_millis(ctx.config.retry_base_delay_ms),
        Duration::from_millis(ctx.config.retry_max_delay_ms),
    );
    let mut fetch = match FetchLoop::spawn(ctx.source.clone(), backoff) {
        Ok(f) => f,
        Err(e) => {
            error!("failed to start fetch worker: {e}");
            ctx.hub.report(format!("fetch worker failed to start: {e}"));
            return;
        }
    };

    let idle = Duration::from_millis(ctx.config.idle_poll_ms.max(1));
    // Live session and the epoch it was built for.
    let mut session: Option<(u64, StreamingSession)> = None;

    loop {
        // ── 0. Check alive flag ──────────────────────────────────────────
        if !ctx.alive.load(Ordering::Relaxed) {
            break;
        }

        // ── 1. Reconcile with enable/disable ─────────────────────────────
        let (epoch, enabled) = ctx.hub.current();
        if let Some((live, _)) = &session {
            if !enabled || *live != epoch {
                debug!(epoch = *live, "session ended");
                session = None;
            }
        }
        if enabled && session.is_none() {
            session = Some((
                epoch,
                StreamingSession::new(ctx.config.sample_rate, ctx.config.backlog_threshold),
            ));
            fetch.begin_session(epoch);
            PipelineDiagnostics::bump(&ctx.diagnostics.sessions_started);
        }

        // ── 2. Issue the next request ────────────────────────────────────
        if fetch.poll(session.is_some()) {
            PipelineDiagnostics::bump(&ctx.diagnostics.requests_issued);
        }

        // ── 3. Handle the completion ─────────────────────────────────────
        match fetch.wait_completion(idle) {
            FetchWait::Completed(completion) => match session.as_mut() {
                Some((live, s)) => handle_completion(&ctx, &mut fetch, *live, s, completion),
                None => PipelineDiagnostics::bump(&ctx.diagnostics.stale_completions),
            },
            FetchWait::Stale => PipelineDiagnostics::bump(&ctx.diagnostics.stale_completions),
            FetchWait::Idle => {}
            FetchWait::Disconnected => {
                error!("fetch worker died, stopping pipeline");
                ctx.hub.report("fetch worker stopped unexpectedly".into());
                break;
            }
        }

        // ── 5. Drain ─────────────────────────────────────────────────────
        if let Some((_, s)) = session.as_mut() {
            if let Some((scheduler, queue)) = s.drain_parts() {
                if !queue.is_empty() {
                    let report = scheduler.drain_pass(queue, ctx.sink.as_mut());
                    PipelineDiagnostics::bump(&ctx.diagnostics.scheduler_passes);
                    ctx.diagnostics
                        .segments_scheduled
                        .fetch_add(report.scheduled, Ordering::Relaxed);
                    if report.underrun {
                        PipelineDiagnostics::bump(&ctx.diagnostics.underruns);
                    }
                    debug!(
                        scheduled = report.scheduled,
                        until = format_args!("{:.3}", report.scheduled_until),
                        "scheduler pass"
                    );
                }
            }
        }
    }

    drop(session);
    let snap = ctx.diagnostics.snapshot();
    info!(
        requests_issued = snap.requests_issued,
        chunks_accepted = snap.chunks_accepted,
        duplicates_dropped = snap.duplicates_dropped,
        empty_chunks = snap.empty_chunks,
        decode_failures = snap.decode_failures,
        transport_failures = snap.transport_failures,
        segments_scheduled = snap.segments_scheduled,
        underruns = snap.underruns,
        "pipeline stopped"
    );
}

fn handle_completion(
    ctx: &PipelineContext,
    fetch: &mut FetchLoop,
    epoch: u64,
    session: &mut StreamingSession,
    completion: FetchCompletion,
) {
    if let Some(delay) = fetch.settle(&completion.result) {
        PipelineDiagnostics::bump(&ctx.diagnostics.transport_failures);
        if let Err(e) = &completion.result {
            warn!(retry_in_ms = delay.as_millis() as u64, "chunk request failed: {e}");
        }
        return;
    }
    let Ok(bytes) = completion.result else {
        return;
    };

    // ── 4. Dedup → decode → queue → gate ─────────────────────────────────
    let chunk = match samples_from_le_bytes(&bytes) {
        Ok(chunk) => chunk,
        Err(e) => {
            PipelineDiagnostics::bump(&ctx.diagnostics.decode_failures);
            warn!("discarding chunk: {e}");
            return;
        }
    };

    match session.ingest(chunk) {
        IngestOutcome::Enqueued { queue_len, started } => {
            PipelineDiagnostics::bump(&ctx.diagnostics.chunks_accepted);
            if started {
                ctx.hub.mark_draining(epoch, queue_len);
            }
        }
        IngestOutcome::Duplicate => {
            PipelineDiagnostics::bump(&ctx.diagnostics.duplicates_dropped);
        }
        IngestOutcome::Empty => {
            PipelineDiagnostics::bump(&ctx.diagnostics.empty_chunks);
        }
        IngestOutcome::Malformed(e) => {
            PipelineDiagnostics::bump(&ctx.diagnostics.decode_failures);
            warn!("discarding chunk: {e}");
        }
    }
}
