//! Model-based VAD: hysteresis over per-window speech probabilities.
//!
//! ## Algorithm
//!
//! 1. Split the 16 kHz buffer into model windows (last window zero-padded).
//! 2. Probability ≥ positive threshold → open a region (or keep it open and
//!    reset the redemption countdown).
//! 3. Probability < negative threshold while open → advance the countdown;
//!    once it covers `redemption_ms` the region closes where the quiet run
//!    began.
//! 4. Regions shorter than `min_speech_ms` are discarded. A region still open
//!    at the end of the buffer closes at the buffer end.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{SpeechSegment, SpeechSegmenter, VadOptions};
use crate::buffering::chunk::AudioChunk;
use crate::error::{PulseError, Result};

/// The only rate speech-probability models are run at.
pub const MODEL_SAMPLE_RATE: u32 = 16_000;

/// Default model window (32 ms at 16 kHz).
pub const DEFAULT_WINDOW: usize = 512;

/// A stateful speech-probability model (Silero, test doubles, ...).
pub trait SpeechProbabilityModel: Send + 'static {
    /// Samples per inference window at [`MODEL_SAMPLE_RATE`].
    fn window_size(&self) -> usize {
        DEFAULT_WINDOW
    }

    /// Probability in [0, 1] that `window` contains speech.
    fn predict(&mut self, window: &[f32]) -> Result<f32>;

    /// Clear recurrent state before a new recording.
    fn reset(&mut self);
}

/// Shared, lockable handle to any [`SpeechProbabilityModel`].
#[derive(Clone)]
pub struct ProbabilityModelHandle(pub Arc<Mutex<dyn SpeechProbabilityModel>>);

impl ProbabilityModelHandle {
    pub fn new<M: SpeechProbabilityModel>(model: M) -> Self {
        Self(Arc::new(Mutex::new(model)))
    }
}

impl std::fmt::Debug for ProbabilityModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbabilityModelHandle").finish_non_exhaustive()
    }
}

/// Primary VAD strategy.
#[derive(Debug, Clone)]
pub struct ModelVad {
    model: ProbabilityModelHandle,
    positive_threshold: f32,
    negative_threshold: f32,
    redemption_ms: u32,
    min_speech_ms: u32,
}

impl ModelVad {
    pub fn new(model: ProbabilityModelHandle, options: &VadOptions) -> Result<Self> {
        let positive = options.positive_speech_threshold;
        let negative = options.negative_speech_threshold;
        if !(0.0..=1.0).contains(&positive) || !(0.0..=1.0).contains(&negative) {
            return Err(PulseError::InvalidConfig(format!(
                "speech thresholds must lie in [0, 1] (positive={positive}, negative={negative})"
            )));
        }
        if negative > positive {
            return Err(PulseError::InvalidConfig(format!(
                "negative threshold {negative} exceeds positive threshold {positive}"
            )));
        }

        Ok(Self {
            model,
            positive_threshold: positive,
            negative_threshold: negative,
            redemption_ms: options.redemption_ms,
            min_speech_ms: options.min_speech_ms,
        })
    }

    /// Capability check + factory.
    ///
    /// Uses the injected model when `options.model` is set, otherwise loads
    /// the Silero model. Fails with `PulseError::Environment` when this build
    /// has no ONNX runtime. Never falls back on its own.
    pub fn from_options(options: &VadOptions) -> Result<Self> {
        let model = match &options.model {
            Some(handle) => handle.clone(),
            None => load_default_model(options)?,
        };
        Self::new(model, options)
    }
}

#[cfg(feature = "onnx")]
fn load_default_model(options: &VadOptions) -> Result<ProbabilityModelHandle> {
    let path = options
        .model_path
        .clone()
        .unwrap_or_else(super::SileroVad::default_model_path);
    Ok(ProbabilityModelHandle::new(super::SileroVad::new(&path)?))
}

#[cfg(not(feature = "onnx"))]
fn load_default_model(_options: &VadOptions) -> Result<ProbabilityModelHandle> {
    Err(PulseError::Environment(
        "model-based VAD requires an ONNX-capable runtime (build with the `onnx` feature)".into(),
    ))
}

impl SpeechSegmenter for ModelVad {
    fn segment(&self, buffer: &AudioChunk) -> Result<Vec<SpeechSegment>> {
        if buffer.sample_rate != MODEL_SAMPLE_RATE {
            return Err(PulseError::UnsupportedSampleRate {
                expected: MODEL_SAMPLE_RATE,
                actual: buffer.sample_rate,
            });
        }
        if buffer.is_empty() {
            return Ok(Vec::new());
        }

        let mut model = self.model.0.lock();
        model.reset();
        let window = model.window_size().max(1);

        let mut probabilities = Vec::with_capacity(buffer.len() / window + 1);
        let mut padded = vec![0.0f32; window];
        for frame in buffer.samples.chunks(window) {
            let prob = if frame.len() == window {
                model.predict(frame)?
            } else {
                padded[..frame.len()].copy_from_slice(frame);
                padded[frame.len()..].iter_mut().for_each(|s| *s = 0.0);
                model.predict(&padded)?
            };
            probabilities.push(if prob.is_finite() { prob } else { 0.0 });
        }
        drop(model);

        let regions = self.regions(&probabilities, window);
        let rate = MODEL_SAMPLE_RATE as f64;
        let segments: Vec<SpeechSegment> = regions
            .into_iter()
            .map(|(start_frame, end_frame)| {
                let start = (start_frame * window) as f64 / rate;
                let end = (end_frame * window).min(buffer.len()) as f64 / rate;
                SpeechSegment::from_buffer(buffer, start, end)
            })
            .collect();

        debug!(
            windows = probabilities.len(),
            segments = segments.len(),
            "model VAD pass complete"
        );
        Ok(segments)
    }

    fn name(&self) -> &'static str {
        "model"
    }
}

impl ModelVad {
    /// Turn per-window probabilities into `[start, end)` window ranges.
    fn regions(&self, probabilities: &[f32], window: usize) -> Vec<(usize, usize)> {
        let window_ms = window as f64 * 1000.0 / MODEL_SAMPLE_RATE as f64;
        let redemption_frames = ((self.redemption_ms as f64 / window_ms).ceil() as usize).max(1);
        let min_speech_frames = (self.min_speech_ms as f64 / window_ms).ceil() as usize;

        let mut regions = Vec::new();
        let mut speaking = false;
        let mut start = 0usize;
        let mut redemption = 0usize;

        let close = |start: usize, end: usize, regions: &mut Vec<(usize, usize)>| {
            if end > start && end - start >= min_speech_frames {
                regions.push((start, end));
            }
        };

        for (i, &prob) in probabilities.iter().enumerate() {
            if prob >= self.positive_threshold {
                redemption = 0;
                if !speaking {
                    speaking = true;
                    start = i;
                }
            }

            if speaking && prob < self.negative_threshold {
                redemption += 1;
                if redemption >= redemption_frames {
                    close(start, i + 1 - redemption, &mut regions);
                    speaking = false;
                    redemption = 0;
                }
            }
        }

        if speaking {
            close(start, probabilities.len(), &mut regions);
        }
        regions
    }
}
