//! Acoustic feature extraction: one [`AudioFeatures`] vector per recording.
//!
//! The buffer is cut into overlapping frames (`frame_size` / `hop_size`).
//! Every frame contributes RMS and zero-crossing rate; spectral, cepstral and
//! pitch statistics are accumulated only where the frame yields a finite
//! value, each with its own counter.

pub mod pitch;
pub mod spectral;
pub mod temporal;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::buffering::chunk::AudioChunk;
use crate::error::{PulseError, Result};
use pitch::Yin;
use spectral::SpectralAnalyzer;
use temporal::FrameGeometry;

/// Upper bound reported for `speech_rate` (syllables per second).
pub const MAX_SPEECH_RATE: f32 = 20.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct FeatureConfig {
    pub sample_rate: u32,
    pub frame_size: usize,
    pub hop_size: usize,
    pub mfcc_coefficients: usize,
    pub mel_bands: usize,
    pub rolloff_fraction: f32,
    pub min_pitch: f32,
    pub max_pitch: f32,
    pub yin_threshold: f32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_size: 512,
            hop_size: 256,
            mfcc_coefficients: 13,
            mel_bands: 26,
            rolloff_fraction: 0.85,
            min_pitch: 50.0,
            max_pitch: 500.0,
            yin_threshold: 0.15,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(PulseError::InvalidConfig(msg));
        if self.sample_rate == 0 {
            return invalid("feature sample rate must be non-zero".into());
        }
        if self.frame_size < 4 || self.hop_size == 0 {
            return invalid(format!(
                "feature frame ({}) must be at least 4 samples and hop ({}) non-zero",
                self.frame_size, self.hop_size
            ));
        }
        if self.mel_bands == 0 || self.mfcc_coefficients == 0 || self.mfcc_coefficients > self.mel_bands {
            return invalid(format!(
                "need 0 < mfcc coefficients ({}) <= mel bands ({})",
                self.mfcc_coefficients, self.mel_bands
            ));
        }
        if !(self.rolloff_fraction > 0.0 && self.rolloff_fraction <= 1.0) {
            return invalid(format!(
                "rolloff fraction must lie in (0, 1], got {}",
                self.rolloff_fraction
            ));
        }
        if !(self.min_pitch > 0.0 && self.min_pitch < self.max_pitch) {
            return invalid(format!(
                "pitch range [{}, {}] is empty",
                self.min_pitch, self.max_pitch
            ));
        }
        if !(self.yin_threshold > 0.0 && self.yin_threshold < 1.0) {
            return invalid(format!(
                "YIN threshold must lie in (0, 1), got {}",
                self.yin_threshold
            ));
        }
        Ok(())
    }
}

/// Per-recording acoustic summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFeatures {
    pub mfcc: Vec<f32>,
    pub spectral_centroid: f32,
    pub spectral_flux: f32,
    pub spectral_rolloff: f32,
    pub rms: f32,
    pub zcr: f32,
    pub speech_rate: f32,
    pub pause_ratio: f32,
    pub pause_count: u32,
    /// Milliseconds.
    pub avg_pause_duration: f32,
    pub pitch_mean: f32,
    pub pitch_std: f32,
    pub pitch_range: f32,
}

impl AudioFeatures {
    /// Degenerate vector for a buffer with no analyzable frames.
    pub fn zeroed(mfcc_coefficients: usize) -> Self {
        Self {
            mfcc: vec![0.0; mfcc_coefficients],
            spectral_centroid: 0.0,
            spectral_flux: 0.0,
            spectral_rolloff: 0.0,
            rms: 0.0,
            zcr: 0.0,
            speech_rate: 0.0,
            pause_ratio: 0.0,
            pause_count: 0,
            avg_pause_duration: 0.0,
            pitch_mean: 0.0,
            pitch_std: 0.0,
            pitch_range: 0.0,
        }
    }

    /// Replace non-finite values with 0 and clamp bounded fields.
    pub fn sanitized(mut self) -> Self {
        fn finite(v: f32) -> f32 {
            if v.is_finite() {
                v
            } else {
                0.0
            }
        }
        self.mfcc.iter_mut().for_each(|c| *c = finite(*c));
        self.spectral_centroid = finite(self.spectral_centroid).clamp(0.0, 1.0);
        self.spectral_flux = finite(self.spectral_flux).clamp(0.0, 1.0);
        self.spectral_rolloff = finite(self.spectral_rolloff).clamp(0.0, 1.0);
        self.rms = finite(self.rms).max(0.0);
        self.zcr = finite(self.zcr).clamp(0.0, 1.0);
        self.speech_rate = finite(self.speech_rate).clamp(0.0, MAX_SPEECH_RATE);
        self.pause_ratio = finite(self.pause_ratio).clamp(0.0, 1.0);
        self.avg_pause_duration = finite(self.avg_pause_duration).max(0.0);
        self.pitch_mean = finite(self.pitch_mean).max(0.0);
        self.pitch_std = finite(self.pitch_std).max(0.0);
        self.pitch_range = finite(self.pitch_range).max(0.0);
        self
    }

    /// True when every numeric field is finite.
    pub fn is_finite(&self) -> bool {
        self.mfcc.iter().all(|c| c.is_finite())
            && [
                self.spectral_centroid,
                self.spectral_flux,
                self.spectral_rolloff,
                self.rms,
                self.zcr,
                self.speech_rate,
                self.pause_ratio,
                self.avg_pause_duration,
                self.pitch_mean,
                self.pitch_std,
                self.pitch_range,
            ]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// Running mean over finite samples only.
#[derive(Debug, Default, Clone, Copy)]
struct Mean {
    sum: f64,
    count: usize,
}

impl Mean {
    fn push(&mut self, v: f32) {
        if v.is_finite() {
            self.sum += v as f64;
            self.count += 1;
        }
    }

    fn get(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            (self.sum / self.count as f64) as f32
        }
    }
}

pub struct FeatureExtractor {
    config: FeatureConfig,
    spectral: SpectralAnalyzer,
    yin: Yin,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Result<Self> {
        config.validate()?;
        let spectral = SpectralAnalyzer::new(
            config.frame_size,
            config.sample_rate,
            config.mel_bands,
            config.mfcc_coefficients,
            config.rolloff_fraction,
        );
        let yin = Yin::new(
            config.sample_rate,
            config.min_pitch,
            config.max_pitch,
            config.yin_threshold,
        );
        Ok(Self {
            config,
            spectral,
            yin,
        })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Extract the feature vector of `buffer`.
    ///
    /// # Errors
    /// `PulseError::SampleRateMismatch` when the buffer is not at the
    /// configured rate.
    pub fn extract(&mut self, buffer: &AudioChunk) -> Result<AudioFeatures> {
        if buffer.sample_rate != self.config.sample_rate {
            return Err(PulseError::SampleRateMismatch {
                expected: self.config.sample_rate,
                actual: buffer.sample_rate,
            });
        }

        let frame_size = self.config.frame_size;
        let hop = self.config.hop_size;
        let samples = &buffer.samples;
        if samples.len() < frame_size {
            debug!(samples = samples.len(), "buffer shorter than one frame");
            return Ok(AudioFeatures::zeroed(self.config.mfcc_coefficients));
        }

        self.spectral.reset();

        let mut frame_rms = Vec::with_capacity((samples.len() - frame_size) / hop + 1);
        let mut zcr = Mean::default();
        let mut centroid = Mean::default();
        let mut rolloff = Mean::default();
        let mut flux = Mean::default();
        let mut mfcc_sum: Vec<f64> = Vec::new();
        let mut mfcc_frames = 0usize;
        let mut pitches: Vec<f32> = Vec::new();
        let mut failed_frames = 0usize;

        let mut start = 0;
        while start + frame_size <= samples.len() {
            let frame = &samples[start..start + frame_size];
            start += hop;

            frame_rms.push(crate::codec::rms(frame));
            zcr.push(zero_crossing_rate(frame));

            match self.spectral.analyze(frame) {
                Some(spectrum) => {
                    centroid.push(spectrum.centroid);
                    rolloff.push(spectrum.rolloff);
                    if let Some(f) = spectrum.flux {
                        flux.push(f);
                    }
                    if let Some(coeffs) = spectrum.mfcc {
                        if coeffs.iter().all(|c| c.is_finite()) {
                            if mfcc_sum.is_empty() {
                                mfcc_sum = vec![0.0; coeffs.len()];
                            }
                            for (acc, c) in mfcc_sum.iter_mut().zip(&coeffs) {
                                *acc += *c as f64;
                            }
                            mfcc_frames += 1;
                        }
                    }
                }
                None => failed_frames += 1,
            }

            if let Some(pitch) = self.yin.estimate(frame) {
                pitches.push(pitch);
            }
        }

        if failed_frames > 0 {
            warn!(failed_frames, "skipped frames with a non-finite spectrum");
        }

        let rms_mean = frame_rms.iter().map(|&r| r as f64).sum::<f64>() / frame_rms.len() as f64;
        let mfcc = if mfcc_frames == 0 {
            vec![0.0; self.config.mfcc_coefficients]
        } else {
            mfcc_sum
                .iter()
                .map(|s| (s / mfcc_frames as f64) as f32)
                .collect()
        };
        let (pitch_mean, pitch_std, pitch_range) = pitch_statistics(&pitches);
        let temporal = temporal::analyze(
            &frame_rms,
            FrameGeometry {
                sample_rate: self.config.sample_rate,
                frame_size,
                hop_size: hop,
            },
            buffer.duration_secs(),
        );

        debug!(
            frames = frame_rms.len(),
            voiced = pitches.len(),
            mfcc_frames,
            "features extracted"
        );

        Ok(AudioFeatures {
            mfcc,
            spectral_centroid: centroid.get(),
            spectral_flux: flux.get(),
            spectral_rolloff: rolloff.get(),
            rms: rms_mean as f32,
            zcr: zcr.get(),
            speech_rate: temporal.speech_rate,
            pause_ratio: temporal.pause_ratio,
            pause_count: temporal.pause_count,
            avg_pause_duration: temporal.avg_pause_duration,
            pitch_mean,
            pitch_std,
            pitch_range,
        }
        .sanitized())
    }
}

/// Sign changes per adjacent sample pair.
fn zero_crossing_rate(frame: &[f32]) -> f32 {
    if frame.len() < 2 {
        return 0.0;
    }
    let crossings = frame
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / (frame.len() - 1) as f32
}

/// Mean, population standard deviation and range of voiced-frame pitches.
fn pitch_statistics(pitches: &[f32]) -> (f32, f32, f32) {
    if pitches.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let n = pitches.len() as f64;
    let mean = pitches.iter().map(|&p| p as f64).sum::<f64>() / n;
    let variance = pitches
        .iter()
        .map(|&p| (p as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    let (min, max) = pitches
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &p| {
            (lo.min(p), hi.max(p))
        });
    (mean as f32, variance.sqrt() as f32, max - min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(FeatureConfig::default()).unwrap()
    }

    fn sine(freq: f32, secs: f32, amplitude: f32) -> AudioChunk {
        let len = (16_000.0 * secs) as usize;
        AudioChunk::new(
            (0..len)
                .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / 16_000.0).sin())
                .collect(),
            16_000,
        )
    }

    #[test]
    fn all_zero_buffer_is_finite_and_degenerate() {
        for len in [1usize, 511, 512, 16_000] {
            let features = extractor()
                .extract(&AudioChunk::new(vec![0.0; len], 16_000))
                .unwrap();
            assert!(features.is_finite(), "len {len}");
            assert_eq!(features, AudioFeatures::zeroed(13), "len {len}");
        }
    }

    #[test]
    fn empty_buffer_is_zeroed() {
        let features = extractor().extract(&AudioChunk::empty(16_000)).unwrap();
        assert_eq!(features, AudioFeatures::zeroed(13));
    }

    #[test]
    fn sine_features_are_sensible() {
        let features = extractor().extract(&sine(220.0, 1.0, 0.5)).unwrap();
        assert!(features.is_finite());
        assert_abs_diff_eq!(features.pitch_mean, 220.0, epsilon = 5.0);
        assert!(features.pitch_std < 5.0);
        assert_abs_diff_eq!(features.rms, 0.5 / 2f32.sqrt(), epsilon = 0.01);
        // 2 crossings per period: 440 / 16000.
        assert_abs_diff_eq!(features.zcr, 440.0 / 16_000.0, epsilon = 0.005);
        assert!(features.spectral_centroid > 0.0 && features.spectral_centroid < 0.1);
        assert!(features.spectral_flux < 0.05);
        assert_eq!(features.pause_count, 0);
        assert_eq!(features.mfcc.len(), 13);
    }

    #[test]
    fn noisy_input_stays_finite() {
        let mut state = 0x1234_5678u32;
        let samples: Vec<f32> = (0..16_000)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state as f32 / u32::MAX as f32) * 2.0 - 1.0
            })
            .collect();
        let features = extractor().extract(&AudioChunk::new(samples, 16_000)).unwrap();
        assert!(features.is_finite());
        assert!(features.zcr > 0.3);
    }

    #[test]
    fn rejects_mismatched_rate() {
        let err = extractor()
            .extract(&AudioChunk::new(vec![0.1; 1024], 48_000))
            .unwrap_err();
        assert!(matches!(
            err,
            PulseError::SampleRateMismatch {
                expected: 16_000,
                actual: 48_000
            }
        ));
    }

    #[test]
    fn rejects_invalid_config() {
        let bad = FeatureConfig {
            mfcc_coefficients: 40,
            ..FeatureConfig::default()
        };
        assert!(matches!(
            FeatureExtractor::new(bad),
            Err(PulseError::InvalidConfig(_))
        ));
    }

    #[test]
    fn sanitized_replaces_non_finite_and_clamps() {
        let mut features = AudioFeatures::zeroed(2);
        features.mfcc[0] = f32::NAN;
        features.speech_rate = 55.0;
        features.pitch_mean = f32::INFINITY;
        let clean = features.sanitized();
        assert!(clean.is_finite());
        assert_eq!(clean.mfcc[0], 0.0);
        assert_eq!(clean.speech_rate, MAX_SPEECH_RATE);
        assert_eq!(clean.pitch_mean, 0.0);
    }

    #[test]
    fn features_serialize_camel_case() {
        let json = serde_json::to_value(AudioFeatures::zeroed(13)).unwrap();
        assert!(json.get("spectralCentroid").is_some());
        assert!(json.get("avgPauseDuration").is_some());
        assert_eq!(json["mfcc"].as_array().map(Vec::len), Some(13));
    }

    #[test]
    fn pitch_statistics_use_population_std() {
        let (mean, std, range) = pitch_statistics(&[100.0, 200.0]);
        assert_abs_diff_eq!(mean, 150.0);
        assert_abs_diff_eq!(std, 50.0);
        assert_abs_diff_eq!(range, 100.0);
    }
}
