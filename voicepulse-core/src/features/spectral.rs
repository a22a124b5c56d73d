//! Per-frame spectral and cepstral analysis.
//!
//! One forward FFT per frame (Hann-windowed) feeds both the amplitude
//! statistics (centroid, rolloff, flux) and the MFCCs (Slaney mel filterbank,
//! natural log, DCT-II).

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Floor applied to mel energies before the log.
const LOG_FLOOR: f32 = 1e-10;

/// Spectral statistics of a single frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralFrame {
    pub centroid: f32,
    pub rolloff: f32,
    /// `None` for the first analyzed frame and for zero-energy frames.
    pub flux: Option<f32>,
    /// `None` for zero-energy frames.
    pub mfcc: Option<Vec<f32>>,
}

pub struct SpectralAnalyzer {
    frame_size: usize,
    rolloff_fraction: f32,
    mfcc_coefficients: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    mel_filters: Vec<Vec<f32>>,
    /// `dct[i][m]`: DCT-II basis for coefficient `i`, band `m`.
    dct: Vec<Vec<f32>>,
    fft_buf: Vec<Complex<f32>>,
    amplitudes: Vec<f32>,
    power: Vec<f32>,
    log_mel: Vec<f32>,
    normalized: Vec<f32>,
    previous: Option<Vec<f32>>,
}

impl SpectralAnalyzer {
    pub fn new(
        frame_size: usize,
        sample_rate: u32,
        mel_bands: usize,
        mfcc_coefficients: usize,
        rolloff_fraction: f32,
    ) -> Self {
        let fft = FftPlanner::<f32>::new().plan_fft_forward(frame_size);
        let nyquist = sample_rate as f32 / 2.0;
        let bins = frame_size / 2;

        Self {
            frame_size,
            rolloff_fraction,
            mfcc_coefficients,
            fft,
            window: build_hann_window(frame_size),
            mel_filters: build_mel_filters(frame_size, sample_rate, mel_bands, 0.0, nyquist),
            dct: build_dct_basis(mfcc_coefficients, mel_bands),
            fft_buf: vec![Complex::new(0.0, 0.0); frame_size],
            amplitudes: vec![0.0; bins],
            power: vec![0.0; bins + 1],
            log_mel: vec![0.0; mel_bands],
            normalized: vec![0.0; bins],
            previous: None,
        }
    }

    /// Forget the previous frame so the next one starts a fresh flux sequence.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Analyze one frame of exactly `frame_size` samples.
    ///
    /// Returns `None` when the spectrum contains non-finite values.
    pub fn analyze(&mut self, frame: &[f32]) -> Option<SpectralFrame> {
        debug_assert_eq!(frame.len(), self.frame_size);

        for (slot, (&s, &w)) in self.fft_buf.iter_mut().zip(frame.iter().zip(&self.window)) {
            *slot = Complex::new(s * w, 0.0);
        }
        self.fft.process(&mut self.fft_buf);

        let bins = self.amplitudes.len();
        for k in 0..=bins {
            self.power[k] = self.fft_buf[k].norm_sqr();
        }
        for k in 0..bins {
            self.amplitudes[k] = self.fft_buf[k].norm();
        }
        if self
            .amplitudes
            .iter()
            .chain(&self.power)
            .any(|v| !v.is_finite())
        {
            return None;
        }

        let total: f32 = self.amplitudes.iter().sum();
        if total <= 0.0 {
            return Some(SpectralFrame {
                centroid: 0.0,
                rolloff: 0.0,
                flux: None,
                mfcc: None,
            });
        }

        let weighted: f32 = self
            .amplitudes
            .iter()
            .enumerate()
            .map(|(k, &a)| k as f32 * a)
            .sum();
        let centroid = (2.0 * weighted / (self.frame_size as f32 * total)).clamp(0.0, 1.0);

        let target = self.rolloff_fraction * total;
        let mut cumulative = 0.0f32;
        let mut rolloff_bin = bins - 1;
        for (k, &a) in self.amplitudes.iter().enumerate() {
            cumulative += a;
            if cumulative >= target {
                rolloff_bin = k;
                break;
            }
        }
        let rolloff = (rolloff_bin as f32 / bins as f32).clamp(0.0, 1.0);

        for (n, &a) in self.normalized.iter_mut().zip(&self.amplitudes) {
            *n = a / total;
        }
        let flux = match self.previous.as_mut() {
            Some(prev) => {
                let distance = prev
                    .iter()
                    .zip(&self.normalized)
                    .map(|(p, q)| (q - p) * (q - p))
                    .sum::<f32>()
                    .sqrt();
                prev.copy_from_slice(&self.normalized);
                Some((distance / std::f32::consts::SQRT_2).clamp(0.0, 1.0))
            }
            None => {
                self.previous = Some(self.normalized.clone());
                None
            }
        };

        Some(SpectralFrame {
            centroid,
            rolloff,
            flux,
            mfcc: Some(self.mfcc()),
        })
    }

    fn mfcc(&mut self) -> Vec<f32> {
        for (slot, filter) in self.log_mel.iter_mut().zip(&self.mel_filters) {
            let energy: f32 = filter.iter().zip(&self.power).map(|(w, p)| w * p).sum();
            *slot = energy.max(LOG_FLOOR).ln();
        }
        self.dct
            .iter()
            .take(self.mfcc_coefficients)
            .map(|basis| basis.iter().zip(&self.log_mel).map(|(b, l)| b * l).sum())
            .collect()
    }
}

fn build_hann_window(n: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n as f32).cos()))
        .collect()
}

/// Slaney-normalized triangular filters over `fft_size / 2 + 1` bins.
fn build_mel_filters(
    fft_size: usize,
    sr: u32,
    n_mels: usize,
    fmin: f32,
    fmax: f32,
) -> Vec<Vec<f32>> {
    let n_freqs = fft_size / 2 + 1;
    let mel_min = hz_to_mel_slaney(fmin);
    let mel_max = hz_to_mel_slaney(fmax);

    let hz_pts: Vec<f32> = (0..=(n_mels + 1))
        .map(|i| mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32)
        .map(mel_to_hz_slaney)
        .collect();

    (0..n_mels)
        .map(|m| {
            let (lower, center, upper) = (hz_pts[m], hz_pts[m + 1], hz_pts[m + 2]);
            let enorm = 2.0 / (upper - lower).max(1e-10);
            (0..n_freqs)
                .map(|k| {
                    let freq = k as f32 * sr as f32 / fft_size as f32;
                    let w = if freq >= lower && freq <= center {
                        (freq - lower) / (center - lower).max(1e-10)
                    } else if freq > center && freq <= upper {
                        (upper - freq) / (upper - center).max(1e-10)
                    } else {
                        0.0
                    };
                    (w * enorm).max(0.0)
                })
                .collect()
        })
        .collect()
}

/// Orthonormal DCT-II basis, `n_coeffs` rows of `n_bands` weights.
fn build_dct_basis(n_coeffs: usize, n_bands: usize) -> Vec<Vec<f32>> {
    use std::f32::consts::PI;
    let scale0 = (1.0 / n_bands as f32).sqrt();
    let scale = (2.0 / n_bands as f32).sqrt();
    (0..n_coeffs)
        .map(|i| {
            let norm = if i == 0 { scale0 } else { scale };
            (0..n_bands)
                .map(|m| norm * (PI * i as f32 * (m as f32 + 0.5) / n_bands as f32).cos())
                .collect()
        })
        .collect()
}

fn hz_to_mel_slaney(hz: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1_000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4_f32).ln() / 27.0;
    if hz >= min_log_hz {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    } else {
        hz / f_sp
    }
}

fn mel_to_hz_slaney(mel: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1_000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4_f32).ln() / 27.0;
    if mel >= min_log_mel {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    } else {
        mel * f_sp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn analyzer() -> SpectralAnalyzer {
        SpectralAnalyzer::new(512, 16_000, 26, 13, 0.85)
    }

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / 16_000.0).sin())
            .collect()
    }

    #[test]
    fn silent_frame_is_all_zero() {
        let frame = analyzer().analyze(&[0.0; 512]).unwrap();
        assert_eq!(frame.centroid, 0.0);
        assert_eq!(frame.rolloff, 0.0);
        assert!(frame.flux.is_none());
        assert!(frame.mfcc.is_none());
    }

    #[test]
    fn centroid_tracks_tone_frequency() {
        // 2 kHz of an 8 kHz Nyquist is a quarter of the band.
        let frame = analyzer().analyze(&sine(2_000.0, 512)).unwrap();
        assert_abs_diff_eq!(frame.centroid, 0.25, epsilon = 0.02);
        assert!(frame.rolloff > 0.2 && frame.rolloff < 0.3);
    }

    #[test]
    fn flux_is_zero_for_a_steady_tone_and_skipped_first() {
        let mut analyzer = analyzer();
        let tone = sine(440.0, 512);
        assert!(analyzer.analyze(&tone).unwrap().flux.is_none());
        let second = analyzer.analyze(&tone).unwrap();
        assert_abs_diff_eq!(second.flux.unwrap(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn flux_is_large_for_disjoint_spectra() {
        let mut analyzer = analyzer();
        analyzer.analyze(&sine(500.0, 512)).unwrap();
        let flux = analyzer.analyze(&sine(6_000.0, 512)).unwrap().flux.unwrap();
        assert!(flux > 0.5 && flux <= 1.0, "flux {flux}");
    }

    #[test]
    fn mfcc_has_configured_length() {
        let frame = analyzer().analyze(&sine(440.0, 512)).unwrap();
        let mfcc = frame.mfcc.unwrap();
        assert_eq!(mfcc.len(), 13);
        assert!(mfcc.iter().all(|c| c.is_finite()));
    }

    #[test]
    fn non_finite_spectrum_is_rejected() {
        let mut frame = vec![0.0f32; 512];
        frame[100] = f32::INFINITY;
        assert!(analyzer().analyze(&frame).is_none());
    }

    #[test]
    fn slaney_mel_scale_round_trips() {
        for hz in [0.0f32, 440.0, 1_000.0, 4_000.0, 8_000.0] {
            assert_abs_diff_eq!(mel_to_hz_slaney(hz_to_mel_slaney(hz)), hz, epsilon = 0.05);
        }
    }
}
