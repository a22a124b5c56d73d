//! Audio device I/O via the cpal backend.
//!
//! # Design constraints
//!
//! The cpal data callbacks run on an OS audio thread at elevated priority.
//! They **must not** allocate, block on a mutex or perform I/O. Capture satisfies
//! that by downmixing into a pre-reserved scratch buffer and pushing into the
//! SPSC ring through [`CaptureSink::push`]; playback only calls
//! [`PlaybackWorklet::render`](crate::playback::PlaybackWorklet::render).
//! Stream error callbacks are off the data path; capture records the failure
//! in the sink's [`CaptureFault`](crate::recorder::CaptureFault).
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). Streams must be created and dropped on the same thread, which is
//! why the recorder opens them inside its capture thread.

pub mod output;
pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

use crate::{
    error::{PulseError, Result},
    recorder::{CaptureConstraints, CaptureSink, CaptureSource, CaptureStream},
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// Downmix scratch reserved up front so callbacks never allocate.
#[cfg(feature = "audio-cpal")]
const MIX_CAPACITY: usize = 16_384;

/// Handle to an active input stream.
///
/// **Not `Send`**: create and drop on the same OS thread.
pub struct AudioCapture {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Actual capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
}

impl CaptureStream for AudioCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// [`CaptureSource`] backed by the system's cpal host.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalCaptureSource;

impl CaptureSource for CpalCaptureSource {
    fn open(&self, constraints: &CaptureConstraints, sink: CaptureSink) -> Result<Box<dyn CaptureStream>> {
        Ok(Box::new(AudioCapture::open(constraints, sink)?))
    }
}

#[cfg(feature = "audio-cpal")]
fn select_input_device(host: &cpal::Host, preferred: Option<&str>) -> Result<cpal::Device> {
    if let Some(preferred_name) = preferred {
        match host.input_devices() {
            Ok(mut devices) => {
                if let Some(device) = devices.find(|device| {
                    device
                        .name()
                        .map(|name| name == preferred_name)
                        .unwrap_or(false)
                }) {
                    return Ok(device);
                }
                warn!("preferred input device '{preferred_name}' not found, falling back");
            }
            Err(e) => warn!("failed to list input devices while resolving preference: {e}"),
        }
    }

    if let Some(default) = host.default_input_device() {
        return Ok(default);
    }
    let mut devices = host
        .input_devices()
        .map_err(|e| PulseError::AudioDevice(e.to_string()))?;
    let fallback = devices.next().ok_or(PulseError::NoDefaultInputDevice)?;
    warn!("no default input device, falling back to first available input");
    Ok(fallback)
}

/// The device's config at `rate` when any supported range covers it,
/// otherwise its default input config.
#[cfg(feature = "audio-cpal")]
fn select_input_config(device: &cpal::Device, rate: Option<u32>) -> Result<cpal::SupportedStreamConfig> {
    if let Some(rate) = rate {
        if let Ok(mut ranges) = device.supported_input_configs() {
            if let Some(range) = ranges.find(|r| {
                r.min_sample_rate().0 <= rate
                    && rate <= r.max_sample_rate().0
                    && matches!(
                        r.sample_format(),
                        SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U8
                    )
            }) {
                return Ok(range.with_sample_rate(SampleRate(rate)));
            }
        }
        info!(rate, "preferred capture rate unsupported, using device default");
    }
    device
        .default_input_config()
        .map_err(|e| PulseError::AudioDevice(e.to_string()))
}

/// Average interleaved frames into `out`, converting each sample with `to_f32`.
#[cfg(feature = "audio-cpal")]
fn downmix<T: Copy>(data: &[T], channels: usize, out: &mut Vec<f32>, to_f32: impl Fn(T) -> f32) {
    let frames = (data.len() / channels).min(out.capacity());
    out.clear();
    for frame in data.chunks_exact(channels).take(frames) {
        let sum: f32 = frame.iter().map(|&s| to_f32(s)).sum();
        out.push(sum / channels as f32);
    }
}

impl AudioCapture {
    /// Open an input stream honouring `constraints` and push mono f32 PCM
    /// into `sink`.
    ///
    /// Must be called from the thread that will also drop this value.
    ///
    /// # Errors
    /// `PulseError::NoDefaultInputDevice` when no microphone is available,
    /// `PulseError::AudioStream` if cpal fails to build or start the stream.
    #[cfg(feature = "audio-cpal")]
    pub fn open(constraints: &CaptureConstraints, mut sink: CaptureSink) -> Result<Self> {
        let host = cpal::default_host();
        let device = select_input_device(&host, constraints.preferred_device.as_deref())?;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            echo_cancellation = constraints.echo_cancellation,
            noise_suppression = constraints.noise_suppression,
            auto_gain_control = constraints.auto_gain_control,
            "opening input device (processing flags are advisory on this backend)"
        );

        let supported = select_input_config(&device, constraints.sample_rate)?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let ch = usize::from(channels.max(1));

        info!(sample_rate, channels, "capture config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let mut mix = Vec::with_capacity(MIX_CAPACITY);
        let fault = sink.fault();

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _info| {
                    if ch == 1 {
                        sink.push(data);
                    } else {
                        downmix(data, ch, &mut mix, |s| s);
                        sink.push(&mix);
                    }
                },
                move |err| {
                    error!("input stream error: {err}");
                    fault.report(err.to_string());
                },
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _info| {
                    downmix(data, ch, &mut mix, |s| s as f32 / 32768.0);
                    sink.push(&mix);
                },
                move |err| {
                    error!("input stream error: {err}");
                    fault.report(err.to_string());
                },
                None,
            ),
            SampleFormat::U8 => device.build_input_stream(
                &config,
                move |data: &[u8], _info| {
                    downmix(data, ch, &mut mix, |s| (s as f32 - 128.0) / 128.0);
                    sink.push(&mix);
                },
                move |err| {
                    error!("input stream error: {err}");
                    fault.report(err.to_string());
                },
                None,
            ),
            fmt => {
                return Err(PulseError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| PulseError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| PulseError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            sample_rate,
        })
    }

    #[cfg(not(feature = "audio-cpal"))]
    pub fn open(_constraints: &CaptureConstraints, _sink: CaptureSink) -> Result<Self> {
        Err(PulseError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
