//! pcmstream command-line player.
//!
//! Polls a PCM chunk endpoint (or a local test tone), buffers a backlog and
//! plays it gaplessly on an output device until Ctrl+C.
//!
//! ## Runtime note
//!
//! The engine driver and the blocking HTTP client live on their own threads.
//! Anything that may build or drop them runs through `spawn_blocking` so it
//! never blocks or tears down a runtime from inside an async task.

mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pcmstream_core::{
    audio::device::list_output_devices, AudioSink, CpalSink, HttpChunkSource, SinkFactory,
    SourceHandle, StreamingEngine, ToneSource,
};
use settings::{default_settings_path, load_settings, save_settings, AppSettings};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Frames per chunk produced by `--tone` (≈ 23 ms at 44.1 kHz).
const TONE_FRAMES_PER_CHUNK: usize = 1024;
/// `--tone` re-serves every n-th block, like a server polled faster than it produces.
const TONE_REPEAT_EVERY: u64 = 5;

/// Command-line arguments for pcmstream
#[derive(Parser, Debug)]
#[command(name = "pcmstream")]
#[command(about = "Live PCM streaming player")]
#[command(version)]
struct Args {
    /// Chunk endpoint URL
    #[arg(short, long)]
    url: Option<String>,

    /// Settings file (defaults to the per-user config directory)
    #[arg(long, env = "PCMSTREAM_SETTINGS")]
    settings: Option<PathBuf>,

    /// Stream sample rate in Hz
    #[arg(short = 'r', long)]
    sample_rate: Option<u32>,

    /// Segments to buffer before playback starts
    #[arg(short, long)]
    backlog: Option<usize>,

    /// Output device name
    #[arg(short, long)]
    device: Option<String>,

    /// Play a generated test tone (Hz) instead of polling a server
    #[arg(long, value_name = "HZ")]
    tone: Option<f64>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Write the effective settings back to the settings file
    #[arg(long)]
    save_settings: bool,
}

impl Args {
    fn apply_to(&self, settings: &mut AppSettings) {
        if let Some(url) = &self.url {
            settings.server_url = url.clone();
        }
        if let Some(rate) = self.sample_rate {
            settings.sample_rate = rate;
        }
        if let Some(backlog) = self.backlog {
            settings.backlog_threshold = backlog;
        }
        if let Some(device) = &self.device {
            settings.preferred_output_device = Some(device.clone());
        }
        settings.normalize();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pcmstream=info,pcmstream_core=info".into()),
        )
        .init();

    let args = Args::parse();

    if args.list_devices {
        for device in list_output_devices() {
            let marker = if device.is_default { " (default)" } else { "" };
            println!("{}{marker}", device.name);
        }
        return Ok(());
    }

    // ── Settings ──────────────────────────────────────────────────────────
    let settings_path = args.settings.clone().unwrap_or_else(default_settings_path);
    let mut app_settings = load_settings(&settings_path);
    app_settings.apply_env_overrides();
    args.apply_to(&mut app_settings);
    info!(
        settings_path = ?settings_path,
        url = %app_settings.server_url,
        sample_rate = app_settings.sample_rate,
        backlog = app_settings.backlog_threshold,
        "settings loaded"
    );

    if args.save_settings {
        save_settings(&settings_path, &app_settings)
            .with_context(|| format!("failed to save settings to {}", settings_path.display()))?;
        info!("settings saved");
    }

    // ── Engine setup ──────────────────────────────────────────────────────
    let tone = args.tone;
    let engine = {
        let settings = app_settings.clone();
        tokio::task::spawn_blocking(move || build_engine(&settings, tone))
            .await
            .context("engine setup task failed")??
    };

    let mut status_rx = engine.subscribe_status();
    {
        let engine = Arc::clone(&engine);
        tokio::task::spawn_blocking(move || engine.enable())
            .await
            .context("enable task failed")?
            .context("failed to start streaming")?;
    }
    info!("streaming; press Ctrl+C to stop");

    // ── Status forwarding until Ctrl+C ────────────────────────────────────
    loop {
        tokio::select! {
            event = status_rx.recv() => match event {
                Ok(event) => match &event.detail {
                    Some(detail) => warn!(state = ?event.state, queued = event.queued_segments, "{detail}"),
                    None => info!(state = ?event.state, queued = event.queued_segments, "playback state"),
                },
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "status events lagged"),
                Err(RecvError::Closed) => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl+C")?;
                info!("Ctrl+C received, stopping");
                break;
            }
        }
    }

    if let Err(e) = engine.disable() {
        warn!("disable: {e}");
    }
    let diagnostics = engine.pipeline_diagnostics_snapshot();
    println!("{}", serde_json::to_string_pretty(&diagnostics)?);

    // Drop the engine (driver + HTTP client) off the async runtime.
    tokio::task::spawn_blocking(move || {
        engine.shutdown();
        drop(engine);
    })
    .await
    .context("shutdown task failed")?;

    Ok(())
}

fn build_engine(settings: &AppSettings, tone: Option<f64>) -> Result<Arc<StreamingEngine>> {
    let config = settings.engine_config();

    let source = match tone {
        Some(hz) => {
            info!(frequency_hz = hz, "using generated test tone");
            SourceHandle::new(
                ToneSource::new(config.sample_rate, TONE_FRAMES_PER_CHUNK, hz)
                    .with_repeat_every(TONE_REPEAT_EVERY),
            )
        }
        None => SourceHandle::new(
            HttpChunkSource::new(settings.http_source_config())
                .context("failed to build HTTP chunk source")?,
        ),
    };

    let stream_rate = config.sample_rate;
    let device = settings.preferred_output_device.clone();
    let sink_factory: SinkFactory = Arc::new(move || {
        let sink = CpalSink::open_with_preference(stream_rate, device.as_deref())?;
        Ok(Box::new(sink) as Box<dyn AudioSink>)
    });

    Ok(Arc::new(StreamingEngine::new(config, source, sink_factory)))
}
