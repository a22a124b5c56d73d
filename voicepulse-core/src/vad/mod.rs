//! Voice Activity Detection: split a recording into speech-bearing segments.
//!
//! Two strategies implement [`SpeechSegmenter`]:
//!
//! - [`ModelVad`]: speech-probability model (Silero under the `onnx`
//!   feature) with hysteresis thresholds. 16 kHz only.
//! - [`EnergyVad`]: deterministic adaptive-threshold RMS fallback.
//!
//! [`segment_speech`] is the only place that falls back from one to the other.

pub mod energy;
pub mod model;

#[cfg(feature = "onnx")]
pub mod silero;

pub use energy::EnergyVad;
pub use model::{ModelVad, ProbabilityModelHandle, SpeechProbabilityModel, MODEL_SAMPLE_RATE};

#[cfg(feature = "onnx")]
pub use silero::SileroVad;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::buffering::chunk::AudioChunk;
use crate::codec::resample;
use crate::error::{PulseError, Result};

/// A detected speech region. Times are seconds from the start of the recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechSegment {
    /// Samples of the region, at the source buffer's sample rate.
    #[serde(skip)]
    pub audio: Vec<f32>,
    pub start: f64,
    pub end: f64,
}

impl SpeechSegment {
    /// Cut `[start, end)` out of `buffer`.
    pub fn from_buffer(buffer: &AudioChunk, start: f64, end: f64) -> Self {
        Self {
            audio: buffer.slice_secs(start, end),
            start,
            end,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// Contract shared by both VAD strategies.
pub trait SpeechSegmenter: Send + Sync {
    /// Return time-ordered, non-overlapping speech segments of `buffer`.
    fn segment(&self, buffer: &AudioChunk) -> Result<Vec<SpeechSegment>>;

    fn name(&self) -> &'static str;
}

/// Tuning for both strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct VadOptions {
    /// Probability at or above which a speech region opens.
    pub positive_speech_threshold: f32,
    /// Probability below which the redemption countdown runs.
    pub negative_speech_threshold: f32,
    /// How long low probability must persist before a region closes.
    pub redemption_ms: u32,
    /// Regions shorter than this are discarded as blips.
    pub min_speech_ms: u32,
    /// Energy fallback: threshold = mean frame RMS × sensitivity.
    pub energy_sensitivity: f32,
    /// Energy fallback analysis frame (samples).
    pub energy_frame_size: usize,
    /// Energy fallback hop (samples).
    pub energy_hop_size: usize,
    /// Override path for the Silero model. `None` uses the default models dir.
    pub model_path: Option<PathBuf>,
    /// Pre-loaded probability model; skips loading from disk when set.
    #[serde(skip)]
    pub model: Option<ProbabilityModelHandle>,
}

impl Default for VadOptions {
    fn default() -> Self {
        Self {
            positive_speech_threshold: 0.5,
            negative_speech_threshold: 0.35,
            redemption_ms: 500,
            min_speech_ms: 250,
            energy_sensitivity: 0.5,
            energy_frame_size: 512,
            energy_hop_size: 256,
            model_path: None,
            model: None,
        }
    }
}

/// Segment `buffer`, preferring the model strategy and falling back to energy.
///
/// Any failure of the model strategy (missing runtime, missing model file,
/// inference error) is logged and answered with [`EnergyVad`]. An error is
/// returned only when the fallback itself cannot run.
pub async fn segment_speech(buffer: &AudioChunk, options: &VadOptions) -> Result<Vec<SpeechSegment>> {
    match run_model_vad(buffer, options).await {
        Ok(segments) => {
            debug!(segments = segments.len(), "model VAD segmented recording");
            Ok(segments)
        }
        Err(e) => {
            warn!("model VAD failed ({e}), falling back to energy VAD");
            let fallback = EnergyVad::from_options(options)?;
            let segments = fallback.segment(buffer)?;
            debug!(segments = segments.len(), "energy VAD segmented recording");
            Ok(segments)
        }
    }
}

async fn run_model_vad(buffer: &AudioChunk, options: &VadOptions) -> Result<Vec<SpeechSegment>> {
    let vad = ModelVad::from_options(options)?;

    let needs_resample = buffer.sample_rate != MODEL_SAMPLE_RATE;
    let model_input = if needs_resample {
        AudioChunk::new(
            resample(&buffer.samples, buffer.sample_rate, MODEL_SAMPLE_RATE),
            MODEL_SAMPLE_RATE,
        )
    } else {
        buffer.clone()
    };

    let segments = tokio::task::spawn_blocking(move || vad.segment(&model_input))
        .await
        .map_err(|e| PulseError::Other(anyhow::anyhow!("model VAD task failed: {e}")))??;

    if !needs_resample {
        return Ok(segments);
    }

    // Re-cut from the original so segment audio keeps the caller's rate.
    Ok(segments
        .into_iter()
        .map(|s| SpeechSegment::from_buffer(buffer, s.start, s.end))
        .collect())
}
