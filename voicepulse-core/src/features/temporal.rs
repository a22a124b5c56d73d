//! Pause and speaking-rate statistics from the per-frame RMS envelope.

/// Fraction of the mean frame RMS below which a frame counts as silent.
const SILENCE_FRACTION: f64 = 0.3;
/// Fraction of the mean speech-frame RMS a local maximum must exceed.
const PEAK_FRACTION: f64 = 0.8;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TemporalFeatures {
    /// Syllable-like energy peaks per second of speech.
    pub speech_rate: f32,
    pub pause_ratio: f32,
    pub pause_count: u32,
    /// Milliseconds.
    pub avg_pause_duration: f32,
}

/// Frame geometry needed to turn frame counts into durations.
#[derive(Debug, Clone, Copy)]
pub struct FrameGeometry {
    pub sample_rate: u32,
    pub frame_size: usize,
    pub hop_size: usize,
}

impl FrameGeometry {
    fn hop_secs(&self) -> f64 {
        self.hop_size as f64 / self.sample_rate as f64
    }

    fn frame_secs(&self) -> f64 {
        self.frame_size as f64 / self.sample_rate as f64
    }
}

/// Compute temporal features for a buffer of `duration_secs` whose frames
/// had the given RMS values.
pub fn analyze(frame_rms: &[f32], geometry: FrameGeometry, duration_secs: f64) -> TemporalFeatures {
    if frame_rms.is_empty() || duration_secs <= 0.0 {
        return TemporalFeatures::default();
    }
    let mean = frame_rms.iter().map(|&r| r as f64).sum::<f64>() / frame_rms.len() as f64;
    if !(mean > 0.0 && mean.is_finite()) {
        return TemporalFeatures::default();
    }
    let threshold = mean * SILENCE_FRACTION;
    let silent = |r: f32| (r as f64) < threshold;

    let mut pause_count = 0u32;
    let mut silent_frames = 0usize;
    let mut in_pause = false;
    for &r in frame_rms {
        if silent(r) {
            silent_frames += 1;
            if !in_pause {
                pause_count += 1;
                in_pause = true;
            }
        } else {
            in_pause = false;
        }
    }

    let silence_secs = silent_frames as f64 * geometry.hop_secs();
    let pause_ratio = (silence_secs / duration_secs).min(1.0);
    let avg_pause_duration = if pause_count > 0 {
        silence_secs * 1000.0 / pause_count as f64
    } else {
        0.0
    };

    let speech: Vec<f64> = frame_rms
        .iter()
        .filter(|&&r| !silent(r))
        .map(|&r| r as f64)
        .collect();
    let speech_rate = if speech.is_empty() {
        0.0
    } else {
        let speech_mean = speech.iter().sum::<f64>() / speech.len() as f64;
        let peak_floor = speech_mean * PEAK_FRACTION;
        let peaks = frame_rms
            .windows(3)
            .filter(|w| {
                let centre = w[1] as f64;
                !silent(w[1]) && w[1] > w[0] && w[1] > w[2] && centre > peak_floor
            })
            .count();
        let speech_secs = speech.len() as f64 * geometry.frame_secs();
        peaks as f64 / speech_secs * (geometry.hop_size as f64 / geometry.frame_size as f64)
    };

    TemporalFeatures {
        speech_rate: speech_rate as f32,
        pause_ratio: pause_ratio as f32,
        pause_count,
        avg_pause_duration: avg_pause_duration as f32,
    }
}
