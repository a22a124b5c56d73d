//! `AudioProcessor`: recording in, feature vector out.
//!
//! ## Flow
//!
//! ```text
//! AudioChunk ─► resample to extractor rate (if needed)
//!            ─► segment_speech (VAD enabled)  ─► concatenate segments
//!            ─► FeatureExtractor::extract     ─► ProcessingResult
//! ```
//!
//! Speech-free recordings (VAD found nothing) are analyzed as an **empty**
//! buffer. A VAD that fails outright instead leaves the whole recording as a
//! single segment. The two paths stay distinct.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    buffering::chunk::AudioChunk,
    codec::resample,
    error::{PulseError, Result},
    features::{AudioFeatures, FeatureConfig, FeatureExtractor},
    vad::{segment_speech, SpeechSegment, VadOptions},
};

/// Samples at or below this magnitude count as silence for validation.
const SILENCE_FLOOR: f32 = 0.001;

/// Configuration for `AudioProcessor`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct ProcessorConfig {
    /// Trim the recording to detected speech before extraction.
    pub enable_vad: bool,
    pub vad: VadOptions,
    pub features: FeatureConfig,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            enable_vad: true,
            vad: VadOptions::default(),
            features: FeatureConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMetadata {
    /// Seconds of input audio.
    pub duration: f64,
    /// Seconds of audio that reached the extractor. Never exceeds `duration`.
    pub speech_duration: f64,
    pub processing_time_ms: f64,
    pub vad_enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub features: AudioFeatures,
    /// `None` when VAD is disabled.
    pub segments: Option<Vec<SpeechSegment>>,
    pub metadata: ProcessingMetadata,
}

pub struct AudioProcessor {
    config: ProcessorConfig,
    extractor: FeatureExtractor,
}

impl AudioProcessor {
    /// # Errors
    /// `PulseError::InvalidConfig` when the feature configuration is invalid.
    pub fn new(config: ProcessorConfig) -> Result<Self> {
        let extractor = FeatureExtractor::new(config.features.clone())?;
        Ok(Self { config, extractor })
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Run VAD (if enabled) and feature extraction over `buffer`.
    ///
    /// # Errors
    /// `PulseError::Processing` wrapping the extractor failure.
    pub async fn process(&mut self, buffer: &AudioChunk) -> Result<ProcessingResult> {
        let span = info_span!(
            "process",
            samples = buffer.len(),
            sample_rate = buffer.sample_rate,
            vad = self.config.enable_vad
        );
        self.process_inner(buffer).instrument(span).await
    }

    async fn process_inner(&mut self, buffer: &AudioChunk) -> Result<ProcessingResult> {
        let started = Instant::now();
        let target_rate = self.extractor.config().sample_rate;

        let input = if buffer.sample_rate != target_rate && buffer.sample_rate != 0 {
            debug!(from = buffer.sample_rate, to = target_rate, "resampling for extraction");
            AudioChunk::new(resample(&buffer.samples, buffer.sample_rate, target_rate), target_rate)
        } else {
            buffer.clone()
        };
        let duration = input.duration_secs();

        let (speech, segments, speech_duration) = if self.config.enable_vad {
            match segment_speech(&input, &self.config.vad).await {
                Ok(segments) if segments.is_empty() => {
                    debug!("no speech detected; analyzing empty buffer");
                    (AudioChunk::empty(target_rate), Some(segments), 0.0)
                }
                Ok(segments) => {
                    let speech_duration: f64 = segments.iter().map(SpeechSegment::duration_secs).sum();
                    let total = segments.iter().map(|s| s.audio.len()).sum();
                    let mut samples = Vec::with_capacity(total);
                    for segment in &segments {
                        samples.extend_from_slice(&segment.audio);
                    }
                    (AudioChunk::new(samples, target_rate), Some(segments), speech_duration)
                }
                Err(e) => {
                    warn!("VAD failed ({e}); treating the whole recording as speech");
                    let whole = SpeechSegment::from_buffer(&input, 0.0, duration);
                    (input, Some(vec![whole]), duration)
                }
            }
        } else {
            (input, None, duration)
        };

        let features = self
            .extractor
            .extract(&speech)
            .map_err(PulseError::processing)?;

        let metadata = ProcessingMetadata {
            duration,
            speech_duration: speech_duration.clamp(0.0, duration),
            processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            vad_enabled: self.config.enable_vad,
        };
        info!(
            duration = metadata.duration,
            speech_duration = metadata.speech_duration,
            segments = segments.as_ref().map_or(0, Vec::len),
            elapsed_ms = metadata.processing_time_ms,
            "recording processed"
        );

        Ok(ProcessingResult {
            features,
            segments,
            metadata,
        })
    }
}

/// Whether `buffer` holds any usable signal.
///
/// Logs a warning when samples exceed full scale.
pub fn validate_audio_data(buffer: &AudioChunk) -> bool {
    if buffer.is_empty() {
        return false;
    }
    let peak = buffer
        .samples
        .iter()
        .fold(0.0f32, |peak, s| peak.max(s.abs()));
    if peak <= SILENCE_FLOOR {
        return false;
    }
    if peak > 1.0 {
        warn!(peak, "audio contains clipped samples");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vad::{ProbabilityModelHandle, SpeechProbabilityModel};
    use approx::assert_abs_diff_eq;

    struct AlwaysFails;

    impl SpeechProbabilityModel for AlwaysFails {
        fn predict(&mut self, _window: &[f32]) -> Result<f32> {
            Err(PulseError::OnnxSession("boom".into()))
        }

        fn reset(&mut self) {}
    }

    fn tone(secs: f32, rate: u32) -> AudioChunk {
        let len = (rate as f32 * secs) as usize;
        AudioChunk::new(
            (0..len)
                .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / rate as f32).sin())
                .collect(),
            rate,
        )
    }

    #[tokio::test]
    async fn silence_with_vad_yields_empty_analysis() {
        let mut processor = AudioProcessor::new(ProcessorConfig::default()).unwrap();
        let result = processor
            .process(&AudioChunk::new(vec![0.0; 16_000], 16_000))
            .await
            .unwrap();
        assert_eq!(result.metadata.speech_duration, 0.0);
        assert_abs_diff_eq!(result.metadata.duration, 1.0);
        assert_eq!(result.segments.as_ref().map(Vec::len), Some(0));
        assert_eq!(result.features, AudioFeatures::zeroed(13));
    }

    #[tokio::test]
    async fn vad_disabled_analyzes_full_buffer() {
        let config = ProcessorConfig {
            enable_vad: false,
            ..ProcessorConfig::default()
        };
        let mut processor = AudioProcessor::new(config).unwrap();
        let result = processor.process(&tone(1.0, 16_000)).await.unwrap();
        assert!(result.segments.is_none());
        assert!(!result.metadata.vad_enabled);
        assert_abs_diff_eq!(result.metadata.speech_duration, 1.0);
        assert!(result.features.pitch_mean > 200.0);
    }

    #[tokio::test]
    async fn vad_failure_keeps_whole_recording() {
        let config = ProcessorConfig {
            vad: VadOptions {
                model: Some(ProbabilityModelHandle::new(AlwaysFails)),
                energy_frame_size: 0,
                ..VadOptions::default()
            },
            ..ProcessorConfig::default()
        };
        let mut processor = AudioProcessor::new(config).unwrap();
        let result = processor.process(&tone(0.5, 16_000)).await.unwrap();
        let segments = result.segments.unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start, 0.0);
        assert_abs_diff_eq!(result.metadata.speech_duration, 0.5);
        assert!(result.features.rms > 0.3);
    }

    #[tokio::test]
    async fn other_rates_are_resampled_before_extraction() {
        let config = ProcessorConfig {
            enable_vad: false,
            ..ProcessorConfig::default()
        };
        let mut processor = AudioProcessor::new(config).unwrap();
        let result = processor.process(&tone(1.0, 48_000)).await.unwrap();
        assert_abs_diff_eq!(result.metadata.duration, 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(result.features.pitch_mean, 220.0, epsilon = 5.0);
    }

    #[tokio::test]
    async fn speech_duration_never_exceeds_duration() {
        let mut processor = AudioProcessor::new(ProcessorConfig::default()).unwrap();
        let result = processor.process(&tone(1.0, 16_000)).await.unwrap();
        assert!(result.metadata.speech_duration <= result.metadata.duration);
        assert!(result.metadata.speech_duration > 0.0);
    }

    #[test]
    fn validation_rejects_empty_and_near_silent() {
        assert!(!validate_audio_data(&AudioChunk::empty(16_000)));
        assert!(!validate_audio_data(&AudioChunk::new(vec![0.001, -0.0005], 16_000)));
    }

    #[test]
    fn validation_accepts_clipped_signal() {
        assert!(validate_audio_data(&AudioChunk::new(vec![0.0, 0.5, 1.5], 16_000)));
    }

    #[test]
    fn processing_error_message() {
        let err = PulseError::processing(PulseError::SampleRateMismatch {
            expected: 16_000,
            actual: 8_000,
        });
        assert!(err.to_string().starts_with("Failed to process audio: "));
    }
}
