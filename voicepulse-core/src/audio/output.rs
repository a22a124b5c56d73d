//! Output-device backend for [`PlaybackWorklet`].
//!
//! The cpal output callback pulls mono audio from the worklet and duplicates
//! it across the device's channels. When the device cannot run at the
//! worklet's rate, a [`RateAdapter`] interpolates on the fly.

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

use crate::error::{PulseError, Result};
use crate::playback::PlaybackWorklet;

/// Samples pulled from the worklet per refill.
const PULL_BLOCK: usize = 256;

/// Linear-interpolating pull adapter from the worklet rate to the device rate.
pub struct RateAdapter {
    /// Source samples advanced per output sample.
    step: f64,
    phase: f64,
    current: f32,
    next: f32,
    block: Vec<f32>,
    pos: usize,
}

impl RateAdapter {
    pub fn new(source_rate: u32, device_rate: u32) -> Self {
        Self {
            step: source_rate as f64 / device_rate.max(1) as f64,
            phase: 0.0,
            current: 0.0,
            next: 0.0,
            block: vec![0.0; PULL_BLOCK],
            pos: PULL_BLOCK,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        (self.step - 1.0).abs() < f64::EPSILON
    }

    /// Fill `out` with device-rate samples pulled from `worklet`.
    pub fn fill(&mut self, worklet: &mut PlaybackWorklet, out: &mut [f32]) {
        if self.is_passthrough() {
            worklet.render(out);
            return;
        }
        for slot in out.iter_mut() {
            *slot = self.current + (self.next - self.current) * self.phase as f32;
            self.phase += self.step;
            while self.phase >= 1.0 {
                self.phase -= 1.0;
                self.current = self.next;
                self.next = self.pull(worklet);
            }
        }
    }

    fn pull(&mut self, worklet: &mut PlaybackWorklet) -> f32 {
        if self.pos == self.block.len() {
            worklet.render(&mut self.block);
            self.pos = 0;
        }
        let sample = self.block[self.pos];
        self.pos += 1;
        sample
    }
}

/// Fill an interleaved device buffer from `worklet`, `mono.len()` frames at
/// a time, duplicating each sample across `channels`. A trailing partial
/// frame is silenced.
#[cfg_attr(not(feature = "audio-cpal"), allow(dead_code))]
fn render_interleaved<T: Copy>(
    adapter: &mut RateAdapter,
    worklet: &mut PlaybackWorklet,
    mono: &mut [f32],
    data: &mut [T],
    channels: usize,
    convert: impl Fn(f32) -> T,
) {
    let channels = channels.max(1);
    let block = mono.len().max(1) * channels;
    for chunk in data.chunks_mut(block) {
        let frames = (chunk.len() / channels).min(mono.len());
        adapter.fill(worklet, &mut mono[..frames]);
        let mut iter = chunk.chunks_exact_mut(channels);
        for (frame, &s) in (&mut iter).zip(&mono[..frames]) {
            frame.fill(convert(s));
        }
        iter.into_remainder().fill(convert(0.0));
    }
}

/// Handle to an active output stream. Not `Send`; drop on the opening thread.
pub struct PlaybackOutput {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    pub device_rate: u32,
    pub channels: u16,
}

impl PlaybackOutput {
    /// Play `worklet` on the system default output device.
    ///
    /// # Errors
    /// `PulseError::NoDefaultOutputDevice` when there is no output device,
    /// `PulseError::AudioStream` if cpal fails to build or start the stream.
    #[cfg(feature = "audio-cpal")]
    pub fn open_default(mut worklet: PlaybackWorklet) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(PulseError::NoDefaultOutputDevice)?;
        let rate = worklet.sample_rate();

        let supported = match device.supported_output_configs() {
            Ok(mut ranges) => ranges
                .find(|r| {
                    r.min_sample_rate().0 <= rate
                        && rate <= r.max_sample_rate().0
                        && matches!(r.sample_format(), SampleFormat::F32 | SampleFormat::I16)
                })
                .map(|r| r.with_sample_rate(SampleRate(rate))),
            Err(e) => {
                warn!("failed to query output configs: {e}");
                None
            }
        };
        let supported = match supported {
            Some(config) => config,
            None => device
                .default_output_config()
                .map_err(|e| PulseError::AudioDevice(e.to_string()))?,
        };

        let device_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let ch = usize::from(channels.max(1));
        info!(
            device = device.name().unwrap_or_default().as_str(),
            device_rate,
            channels,
            source_rate = rate,
            "opening output device"
        );

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(device_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let mut adapter = RateAdapter::new(rate, device_rate);
        let mut mono = vec![0.0f32; 16_384];

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _info| {
                    render_interleaved(&mut adapter, &mut worklet, &mut mono, data, ch, |s| s);
                },
                |err| error!("output stream error: {err}"),
                None,
            ),
            SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _info| {
                    render_interleaved(&mut adapter, &mut worklet, &mut mono, data, ch, |s| {
                        let v = s.clamp(-1.0, 1.0);
                        if v < 0.0 {
                            (v * 32768.0) as i16
                        } else {
                            (v * 32767.0) as i16
                        }
                    });
                },
                |err| error!("output stream error: {err}"),
                None,
            ),
            fmt => {
                return Err(PulseError::AudioStream(format!(
                    "unsupported output sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| PulseError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| PulseError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            device_rate,
            channels,
        })
    }

    #[cfg(not(feature = "audio-cpal"))]
    pub fn open_default(_worklet: PlaybackWorklet) -> Result<Self> {
        Err(PulseError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
