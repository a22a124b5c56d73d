//! YIN fundamental-frequency estimation.
//!
//! de Cheveigné & Kawahara (2002): squared-difference function over the
//! first half of the frame, cumulative-mean normalization, absolute
//! threshold, parabolic interpolation around the chosen lag.

/// Working buffers for one [`Yin`] instance. Grown on demand, never shrunk.
#[derive(Debug, Default)]
struct YinScratch {
    difference: Vec<f32>,
    normalized: Vec<f32>,
}

impl YinScratch {
    fn ensure(&mut self, lags: usize) {
        if self.difference.len() < lags {
            self.difference.resize(lags, 0.0);
            self.normalized.resize(lags, 0.0);
        }
    }
}

#[derive(Debug)]
pub struct Yin {
    sample_rate: u32,
    min_pitch: f32,
    max_pitch: f32,
    threshold: f32,
    scratch: YinScratch,
}

impl Yin {
    pub fn new(sample_rate: u32, min_pitch: f32, max_pitch: f32, threshold: f32) -> Self {
        Self {
            sample_rate,
            min_pitch,
            max_pitch,
            threshold,
            scratch: YinScratch::default(),
        }
    }

    /// Estimated pitch of `frame` in Hz, or `None` when the frame is unvoiced.
    pub fn estimate(&mut self, frame: &[f32]) -> Option<f32> {
        let half = frame.len() / 2;
        if half < 3 {
            return None;
        }
        let sr = self.sample_rate as f32;
        let tau_min = ((sr / self.max_pitch).floor() as usize).max(2);
        let tau_max = ((sr / self.min_pitch).ceil() as usize).min(half - 1);
        if tau_min >= tau_max {
            return None;
        }

        self.scratch.ensure(tau_max + 1);
        let YinScratch {
            difference,
            normalized,
        } = &mut self.scratch;

        difference[0] = 0.0;
        for tau in 1..=tau_max {
            difference[tau] = frame[..half]
                .iter()
                .zip(&frame[tau..tau + half])
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
        }

        normalized[0] = 1.0;
        let mut running = 0.0f32;
        for tau in 1..=tau_max {
            running += difference[tau];
            normalized[tau] = if running > 0.0 {
                difference[tau] * tau as f32 / running
            } else {
                1.0
            };
        }

        let mut tau = (tau_min..=tau_max).find(|&t| normalized[t] < self.threshold)?;
        while tau < tau_max && normalized[tau + 1] < normalized[tau] {
            tau += 1;
        }

        let refined = if tau > 1 && tau < tau_max {
            let (s0, s1, s2) = (normalized[tau - 1], normalized[tau], normalized[tau + 1]);
            let denom = s0 + s2 - 2.0 * s1;
            if denom.abs() > f32::EPSILON {
                tau as f32 + (s0 - s2) / (2.0 * denom)
            } else {
                tau as f32
            }
        } else {
            tau as f32
        };

        let pitch = sr / refined;
        (pitch.is_finite() && pitch > 0.0).then_some(pitch)
    }

    #[cfg(test)]
    fn scratch_capacity(&self) -> usize {
        self.scratch.difference.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.8 * (2.0 * std::f32::consts::PI * freq * i as f32 / 16_000.0).sin())
            .collect()
    }

    fn yin() -> Yin {
        Yin::new(16_000, 50.0, 500.0, 0.15)
    }

    #[test]
    fn estimates_sine_pitch() {
        let mut yin = yin();
        for freq in [110.0f32, 220.0, 330.0] {
            let pitch = yin.estimate(&sine(freq, 1024)).expect("voiced frame");
            assert_abs_diff_eq!(pitch, freq, epsilon = freq * 0.02);
        }
    }

    #[test]
    fn silence_is_unvoiced() {
        assert!(yin().estimate(&[0.0; 512]).is_none());
    }

    #[test]
    fn tiny_frames_are_unvoiced() {
        assert!(yin().estimate(&[0.1, -0.1, 0.1, -0.1]).is_none());
    }

    #[test]
    fn scratch_grows_but_never_shrinks() {
        let mut yin = yin();
        yin.estimate(&sine(200.0, 1024));
        let grown = yin.scratch_capacity();
        yin.estimate(&sine(200.0, 512));
        assert_eq!(yin.scratch_capacity(), grown);
    }
}
