//! Audio output: the `AudioSink` seam and its cpal backend.
//!
//! # Design constraints
//!
//! The cpal output callback runs on an OS audio thread at elevated priority.
//! It **must not** block on a mutex or perform I/O. `CpalSink` therefore hands
//! samples over through an SPSC ring buffer: the scheduler pushes on the driver
//! thread, the callback pops and writes silence on underrun.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on macOS).
//! `CpalSink` therefore must be created and dropped on the same thread.
//! The engine accomplishes this by opening the sink inside `spawn_blocking`.

pub mod device;
pub mod resample;
pub mod timeline;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
};

use crate::buffering::chunk::Segment;
#[cfg(feature = "audio-cpal")]
use crate::buffering::{create_output_ring, Consumer, Observer, OutputConsumer, OutputProducer, Producer};
use crate::error::{Result, StreamError};
#[cfg(feature = "audio-cpal")]
use resample::StereoRateConverter;
#[cfg(feature = "audio-cpal")]
use timeline::ScheduleChain;
use std::sync::Arc;
#[cfg(feature = "audio-cpal")]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "audio-cpal")]
use tracing::{debug, error, info, warn};

/// Where scheduled segments go.
///
/// Times are seconds on the sink's own clock. Once a segment is handed over
/// it belongs to the sink; there is no way to take it back.
pub trait AudioSink {
    /// Current playback position of the sink clock.
    fn current_time(&self) -> f64;

    /// Queue `segment` to start playing at `start_at`.
    ///
    /// A start time in the future leaves silence before the segment; a start
    /// time already reached plays the segment as soon as possible.
    fn schedule(&mut self, segment: Segment, start_at: f64);
}

/// Opens the sink on the driver thread. Called again each time the driver is
/// restarted after a shutdown.
pub type SinkFactory = Arc<dyn Fn() -> Result<Box<dyn AudioSink>> + Send + Sync + 'static>;

/// Resampler input block per rubato call (frames).
#[cfg(feature = "audio-cpal")]
const RESAMPLE_CHUNK: usize = 1024;

/// Handle to an active output stream.
///
/// **Not `Send`**: `cpal::Stream` is bound to its creation thread on Windows/macOS.
pub struct CpalSink {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    #[cfg(feature = "audio-cpal")]
    producer: OutputProducer,
    /// Frames rendered by the device callback so far, silence included.
    #[cfg(feature = "audio-cpal")]
    frames_played: Arc<AtomicU64>,
    /// `Some` when the device runs at a different rate than the stream.
    #[cfg(feature = "audio-cpal")]
    resampler: Option<StereoRateConverter>,
    #[cfg(feature = "audio-cpal")]
    chain: ScheduleChain,
    /// Actual device sample rate (Hz).
    pub device_rate: u32,
}

impl CpalSink {
    /// Open an output device by preferred name, otherwise fall back to the
    /// default output device and then the first available device.
    ///
    /// `stream_rate` is the rate of incoming segments; the device is asked to
    /// run at it and segments are resampled when it cannot.
    #[cfg(feature = "audio-cpal")]
    pub fn open_with_preference(stream_rate: u32, preferred_device_name: Option<&str>) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let mut selected_device = None;

        if let Some(preferred_name) = preferred_device_name {
            match host.output_devices() {
                Ok(mut devices) => {
                    selected_device = devices.find(|device| {
                        device
                            .name()
                            .map(|name| name == preferred_name)
                            .unwrap_or(false)
                    });

                    if selected_device.is_none() {
                        warn!(
                            "preferred output device '{}' not found, falling back",
                            preferred_name
                        );
                    }
                }
                Err(e) => {
                    warn!("failed to list output devices while resolving preference: {e}");
                }
            }
        }

        let device = if let Some(device) = selected_device {
            device
        } else if let Some(default) = host.default_output_device() {
            default
        } else {
            let mut devices = host
                .output_devices()
                .map_err(|e| StreamError::AudioDevice(e.to_string()))?;
            let fallback = devices.next().ok_or(StreamError::NoDefaultOutputDevice)?;
            warn!("no default output device, falling back to first available output");
            fallback
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening output device"
        );

        let supported = pick_output_config(&device, stream_rate)?;
        let device_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let sample_format = supported.sample_format();

        info!(device_rate, stream_rate, channels, ?sample_format, "audio config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(device_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let resampler = if device_rate != stream_rate {
            Some(StereoRateConverter::new(stream_rate, device_rate, RESAMPLE_CHUNK)?)
        } else {
            None
        };

        let (producer, consumer) = create_output_ring();
        let frames_played = Arc::new(AtomicU64::new(0));

        let stream = match sample_format {
            SampleFormat::F32 => build_output::<f32>(&device, &config, consumer, Arc::clone(&frames_played)),
            SampleFormat::I16 => build_output::<i16>(&device, &config, consumer, Arc::clone(&frames_played)),
            SampleFormat::U16 => build_output::<u16>(&device, &config, consumer, Arc::clone(&frames_played)),
            fmt => {
                return Err(StreamError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| StreamError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            producer,
            frames_played,
            resampler,
            chain: ScheduleChain::new(),
            device_rate,
        })
    }

    /// Device frame index at which the next pushed sample will be heard.
    #[cfg(feature = "audio-cpal")]
    fn write_cursor_frames(&self) -> u64 {
        let queued = (self.producer.occupied_len() / 2) as u64;
        self.frames_played.load(Ordering::Acquire) + queued
    }

    #[cfg(feature = "audio-cpal")]
    fn push(&mut self, samples: &[f32]) {
        let written = self.producer.push_slice(samples);
        if written < samples.len() {
            warn!(
                "output ring full: dropped {} samples",
                samples.len() - written
            );
        }
    }
}

#[cfg(feature = "audio-cpal")]
impl AudioSink for CpalSink {
    fn current_time(&self) -> f64 {
        self.frames_played.load(Ordering::Acquire) as f64 / self.device_rate as f64
    }

    fn schedule(&mut self, segment: Segment, start_at: f64) {
        let placement = self.chain.place(
            start_at,
            segment.duration_secs(),
            self.write_cursor_frames(),
            self.device_rate,
        );
        if placement.reanchor {
            if let Some(rc) = self.resampler.as_mut() {
                rc.reset();
            }
        }
        if placement.pad_frames > 0 {
            debug!(gap_frames = placement.pad_frames, "padding silence before segment");
            self.push(&vec![0.0; placement.pad_frames as usize * 2]);
        }

        let samples = match self.resampler.as_mut() {
            Some(rc) => rc.process(&segment.left, &segment.right),
            None => segment.interleaved(),
        };
        self.push(&samples);
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl CpalSink {
    pub fn open_with_preference(_stream_rate: u32, _preferred_device_name: Option<&str>) -> Result<Self> {
        Err(StreamError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

#[cfg(not(feature = "audio-cpal"))]
impl AudioSink for CpalSink {
    fn current_time(&self) -> f64 {
        0.0
    }

    fn schedule(&mut self, _segment: Segment, _start_at: f64) {}
}

/// Prefer a stereo config at the stream rate, then any config at the stream
/// rate, then the device default.
#[cfg(feature = "audio-cpal")]
fn pick_output_config(
    device: &cpal::Device,
    stream_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let rate = SampleRate(stream_rate);
    if let Ok(ranges) = device.supported_output_configs() {
        let mut at_rate: Vec<_> = ranges
            .filter(|r| r.min_sample_rate() <= rate && rate <= r.max_sample_rate())
            .filter(|r| {
                matches!(
                    r.sample_format(),
                    SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16
                )
            })
            .collect();
        at_rate.sort_by_key(|r| (r.channels() != 2, r.sample_format() != SampleFormat::F32));
        if let Some(range) = at_rate.into_iter().next() {
            return Ok(range.with_sample_rate(rate));
        }
    }

    device
        .default_output_config()
        .map_err(|e| StreamError::AudioDevice(e.to_string()))
}

#[cfg(feature = "audio-cpal")]
fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut consumer: OutputConsumer,
    frames_played: Arc<AtomicU64>,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let ch = config.channels as usize;
    let mut stereo_buf: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _info| {
                let frames = data.len() / ch;
                stereo_buf.resize(frames * 2, 0.0);
                let popped = consumer.pop_slice(&mut stereo_buf);
                // Underrun: whatever the ring could not supply is silence.
                stereo_buf[popped..].fill(0.0);

                for f in 0..frames {
                    let l = stereo_buf[f * 2];
                    let r = stereo_buf[f * 2 + 1];
                    let base = f * ch;
                    if ch == 1 {
                        data[base] = T::from_sample((l + r) * 0.5);
                    } else {
                        data[base] = T::from_sample(l);
                        data[base + 1] = T::from_sample(r);
                        for c in 2..ch {
                            data[base + c] = T::from_sample(0.0f32);
                        }
                    }
                }
                frames_played.fetch_add(frames as u64, Ordering::Release);
            },
            |err| error!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| StreamError::AudioStream(e.to_string()))
}
