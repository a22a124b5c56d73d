//! Pipeline-wide configuration loaded from JSON.
//!
//! Every field is optional in the file; missing ones take their defaults.
//! [`PipelineConfig::normalize`] pulls out-of-range values back into range
//! instead of rejecting the file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    engine::ProcessorConfig,
    error::{PulseError, Result},
    playback::PlaybackConfig,
    recorder::RecorderConfig,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct PipelineConfig {
    pub processor: ProcessorConfig,
    pub recorder: RecorderConfig,
    pub playback: PlaybackConfig,
}

impl PipelineConfig {
    /// Read and normalize a JSON config file.
    ///
    /// # Errors
    /// `PulseError::Io` if the file cannot be read, `PulseError::InvalidConfig`
    /// if it is not valid JSON for this shape.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::from_json(&raw)
            .map_err(|e| PulseError::InvalidConfig(format!("{}: {e}", path.display())))?;
        config.normalize();
        debug!(path = %path.display(), "pipeline config loaded");
        Ok(config)
    }

    pub fn from_json(raw: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| PulseError::Other(e.into()))
    }

    /// Clamp every tunable into its valid range, logging each correction.
    pub fn normalize(&mut self) {
        let vad = &mut self.processor.vad;
        vad.positive_speech_threshold = clamp_unit("vad.positiveSpeechThreshold", vad.positive_speech_threshold, 0.5);
        vad.negative_speech_threshold = clamp_unit("vad.negativeSpeechThreshold", vad.negative_speech_threshold, 0.35);
        if vad.negative_speech_threshold > vad.positive_speech_threshold {
            warn!("vad.negativeSpeechThreshold above positive threshold; lowering it");
            vad.negative_speech_threshold = vad.positive_speech_threshold;
        }
        if !(vad.energy_sensitivity.is_finite() && vad.energy_sensitivity > 0.0) {
            warn!(value = vad.energy_sensitivity, "vad.energySensitivity reset to 0.5");
            vad.energy_sensitivity = 0.5;
        }
        fix_frame(&mut vad.energy_frame_size, &mut vad.energy_hop_size, "vad.energy");

        let features = &mut self.processor.features;
        if features.sample_rate == 0 {
            warn!("features.sampleRate reset to 16000");
            features.sample_rate = 16_000;
        }
        if features.frame_size < 4 {
            warn!(value = features.frame_size, "features.frameSize raised to 4");
            features.frame_size = 4;
        }
        fix_frame(&mut features.frame_size, &mut features.hop_size, "features");
        features.mel_bands = features.mel_bands.max(1);
        features.mfcc_coefficients = features.mfcc_coefficients.clamp(1, features.mel_bands);
        features.rolloff_fraction = clamp_unit("features.rolloffFraction", features.rolloff_fraction, 0.85);
        features.yin_threshold = clamp_unit("features.yinThreshold", features.yin_threshold, 0.15);
        if !(features.min_pitch > 0.0 && features.min_pitch < features.max_pitch) {
            warn!(
                min = features.min_pitch,
                max = features.max_pitch,
                "features pitch range reset to 50-500 Hz"
            );
            features.min_pitch = 50.0;
            features.max_pitch = 500.0;
        }

        let recorder = &mut self.recorder;
        if recorder.sample_rate == 0 {
            warn!("recorder.sampleRate reset to 16000");
            recorder.sample_rate = 16_000;
        }
        recorder.resample_chunk = recorder.resample_chunk.max(1);
        recorder.ring_capacity = recorder.ring_capacity.max(recorder.resample_chunk);

        let playback = &mut self.playback;
        if playback.sample_rate == 0 {
            warn!("playback.sampleRate reset to 24000");
            playback.sample_rate = 24_000;
        }
        if !(playback.high_water_seconds.is_finite() && playback.high_water_seconds > 0.0) {
            playback.high_water_seconds = 30.0;
        }
        if !(playback.low_water_seconds.is_finite() && playback.low_water_seconds >= 0.0)
            || playback.low_water_seconds > playback.high_water_seconds
        {
            playback.low_water_seconds = playback.high_water_seconds / 3.0;
        }
    }
}

/// Values outside the open interval (0, 1) fall back to `default`.
fn clamp_unit(name: &str, value: f32, default: f32) -> f32 {
    if value > 0.0 && value < 1.0 {
        value
    } else {
        warn!(name, value, default, "out-of-range value replaced");
        default
    }
}

fn fix_frame(frame: &mut usize, hop: &mut usize, name: &str) {
    if *frame == 0 {
        warn!(name, "frame size of 0 raised to 512");
        *frame = 512;
    }
    if *hop == 0 || *hop > *frame {
        let fixed = (*frame / 2).max(1);
        warn!(name, hop = *hop, fixed, "hop size out of range");
        *hop = fixed;
    }
}
