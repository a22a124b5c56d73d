//! Energy-based VAD using an adaptive RMS threshold.
//!
//! ## Algorithm
//!
//! 1. Compute RMS over sliding frames (default 512 samples, hop 256).
//! 2. Threshold = mean frame RMS × `sensitivity`.
//! 3. Every maximal run of frames with RMS above the threshold becomes one
//!    segment, from the first frame's start to the last frame's end (a run
//!    that reaches the final frame extends to the end of the buffer).
//!
//! A recording with no frame above threshold yields **no** segments. Silence
//! must not masquerade as one full-length speech segment.

use super::{SpeechSegment, SpeechSegmenter, VadOptions};
use crate::buffering::chunk::AudioChunk;
use crate::codec::rms;
use crate::error::{PulseError, Result};

/// Deterministic fallback segmenter.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    /// Multiplier applied to the mean frame RMS.
    sensitivity: f32,
    frame_size: usize,
    hop_size: usize,
}

impl EnergyVad {
    /// Create a new `EnergyVad`.
    ///
    /// # Errors
    /// `PulseError::InvalidConfig` for a zero frame/hop or a non-positive
    /// sensitivity.
    pub fn new(sensitivity: f32, frame_size: usize, hop_size: usize) -> Result<Self> {
        if frame_size == 0 || hop_size == 0 {
            return Err(PulseError::InvalidConfig(format!(
                "energy VAD frame ({frame_size}) and hop ({hop_size}) must be non-zero"
            )));
        }
        if !(sensitivity.is_finite() && sensitivity > 0.0) {
            return Err(PulseError::InvalidConfig(format!(
                "energy VAD sensitivity must be positive, got {sensitivity}"
            )));
        }
        Ok(Self {
            sensitivity,
            frame_size,
            hop_size,
        })
    }

    pub fn from_options(options: &VadOptions) -> Result<Self> {
        Self::new(
            options.energy_sensitivity,
            options.energy_frame_size,
            options.energy_hop_size,
        )
    }

    /// RMS of each analysis frame. A buffer shorter than one frame is a
    /// single short frame.
    fn frame_energies(&self, samples: &[f32]) -> Vec<f32> {
        if samples.is_empty() {
            return Vec::new();
        }
        if samples.len() < self.frame_size {
            return vec![rms(samples)];
        }
        (0..=samples.len() - self.frame_size)
            .step_by(self.hop_size)
            .map(|start| rms(&samples[start..start + self.frame_size]))
            .collect()
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self {
            sensitivity: 0.5,
            frame_size: 512,
            hop_size: 256,
        }
    }
}

impl SpeechSegmenter for EnergyVad {
    fn segment(&self, buffer: &AudioChunk) -> Result<Vec<SpeechSegment>> {
        if buffer.sample_rate == 0 {
            return Err(PulseError::InvalidConfig(
                "cannot segment a buffer with a 0 Hz sample rate".into(),
            ));
        }

        let energies = self.frame_energies(&buffer.samples);
        if energies.is_empty() {
            return Ok(Vec::new());
        }

        let mean = energies.iter().map(|&e| e as f64).sum::<f64>() / energies.len() as f64;
        let threshold = mean * self.sensitivity as f64;
        if threshold <= 0.0 || !threshold.is_finite() {
            return Ok(Vec::new());
        }

        let mut runs: Vec<(usize, usize)> = Vec::new();
        let mut run_start: Option<usize> = None;
        for (i, &energy) in energies.iter().enumerate() {
            let active = energy as f64 > threshold;
            match (active, run_start) {
                (true, None) => run_start = Some(i),
                (false, Some(first)) => {
                    runs.push((first, i - 1));
                    run_start = None;
                }
                _ => {}
            }
        }
        let last_frame = energies.len() - 1;
        if let Some(first) = run_start {
            runs.push((first, last_frame));
        }

        let rate = buffer.sample_rate as f64;
        let len = buffer.len();
        let segments = runs
            .iter()
            .enumerate()
            .map(|(k, &(first, last))| {
                let start = first * self.hop_size;
                // A run reaching the final frame also owns the unframed tail.
                let mut end = if last == last_frame {
                    len
                } else {
                    (last * self.hop_size + self.frame_size).min(len)
                };
                // Frames overlap when frame > hop; stop where the next run begins.
                if let Some(&(next_first, _)) = runs.get(k + 1) {
                    end = end.min(next_first * self.hop_size);
                }
                SpeechSegment::from_buffer(buffer, start as f64 / rate, end as f64 / rate)
            })
            .collect();

        Ok(segments)
    }

    fn name(&self) -> &'static str {
        "energy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(samples: Vec<f32>) -> AudioChunk {
        AudioChunk::new(samples, 16_000)
    }

    #[test]
    fn all_zero_input_yields_no_segments() {
        let vad = EnergyVad::default();
        for len in [1, 100, 512, 16_000] {
            assert!(vad.segment(&chunk(vec![0.0; len])).unwrap().is_empty());
        }
    }

    #[test]
    fn empty_input_yields_no_segments() {
        assert!(EnergyVad::default().segment(&chunk(vec![])).unwrap().is_empty());
    }

    #[test]
    fn silent_then_loud_yields_one_segment_near_midpoint() {
        let mut samples = vec![0.0f32; 8_000];
        samples.extend(std::iter::repeat(1.0f32).take(8_000));
        let buffer = chunk(samples);
        let segments = EnergyVad::default().segment(&buffer).unwrap();

        assert_eq!(segments.len(), 1);
        let duration = buffer.duration_secs();
        let start_fraction = segments[0].start / duration;
        assert!(
            start_fraction > 0.4 && start_fraction < 0.6,
            "start fraction {start_fraction}"
        );
        assert!((segments[0].end - duration).abs() < 1e-9);
    }

    #[test]
    fn separated_bursts_yield_ordered_non_overlapping_segments() {
        let mut samples = vec![0.0f32; 4_000];
        samples.extend(vec![0.6f32; 4_000]);
        samples.extend(vec![0.0f32; 4_000]);
        samples.extend(vec![0.6f32; 4_000]);
        samples.extend(vec![0.0f32; 4_000]);
        let segments = EnergyVad::default().segment(&chunk(samples)).unwrap();

        assert_eq!(segments.len(), 2);
        assert!(segments[0].end <= segments[1].start);
        for seg in &segments {
            assert_eq!(
                seg.audio.len(),
                ((seg.end - seg.start) * 16_000.0).round() as usize
            );
        }
    }

    #[test]
    fn short_buffer_is_one_frame() {
        let segments = EnergyVad::default().segment(&chunk(vec![0.5; 100])).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].audio.len(), 100);
    }

    #[test]
    fn rejects_degenerate_configuration() {
        assert!(EnergyVad::new(0.5, 0, 256).is_err());
        assert!(EnergyVad::new(0.5, 512, 0).is_err());
        assert!(EnergyVad::new(0.0, 512, 256).is_err());
    }

    #[test]
    fn dense_hop_with_short_gap_keeps_segments_disjoint() {
        let mut samples = vec![0.0f32; 4_000];
        samples.extend(vec![0.8f32; 4_000]);
        samples.extend(vec![0.0f32; 542]);
        samples.extend(vec![0.8f32; 4_000]);
        samples.extend(vec![0.0f32; 4_000]);
        let total = samples.len();
        let vad = EnergyVad::new(0.5, 512, 128).unwrap();
        let segments = vad.segment(&chunk(samples)).unwrap();

        assert_eq!(segments.len(), 2);
        assert!(
            segments[0].end <= segments[1].start,
            "{} > {}",
            segments[0].end,
            segments[1].start
        );
        let concatenated: usize = segments.iter().map(|s| s.audio.len()).sum();
        let span = ((segments[1].end - segments[0].start) * 16_000.0).round() as usize;
        assert!(concatenated <= span && span <= total);
    }

    #[test]
    fn zero_sample_rate_is_an_error() {
        let err = EnergyVad::default()
            .segment(&AudioChunk::new(vec![0.5; 1024], 0))
            .unwrap_err();
        assert!(matches!(err, PulseError::InvalidConfig(_)));
    }
}
