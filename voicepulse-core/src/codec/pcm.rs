//! Float ↔ 16-bit PCM conversion, linear resampling and RMS.

/// Convert [-1, 1] float samples to signed 16-bit PCM.
///
/// Out-of-range input saturates at the boundary values. The negative side
/// scales by 0x8000 and the positive side by 0x7fff so both ends of the
/// two's-complement range are reachable.
pub fn float_to_int16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let s = if s.is_nan() { 0.0 } else { s.clamp(-1.0, 1.0) };
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

/// Convert signed 16-bit PCM back to [-1, 1] float samples.
pub fn int16_to_float(samples: &[i16]) -> Vec<f32> {
    samples
        .iter()
        .map(|&s| {
            if s < 0 {
                s as f32 / 32768.0
            } else {
                s as f32 / 32767.0
            }
        })
        .collect()
}

/// Linear-interpolation resampler.
///
/// Identity when the rates match. Output length is
/// `round(len * to_rate / from_rate)`.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (samples.len() as f64 * to_rate as f64 / from_rate as f64).round() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = (pos.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = (pos - idx as f64) as f32;
            samples[idx] + (samples[next] - samples[idx]) * frac
        })
        .collect()
}

/// Root-mean-square amplitude; 0 for empty input.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f32::consts::PI;

    fn sine(freq: f32, rate: u32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn out_of_range_samples_saturate() {
        assert_eq!(float_to_int16(&[1.5, -2.0, 1.0, -1.0, 0.0]), vec![32767, -32768, 32767, -32768, 0]);
    }

    #[test]
    fn nan_maps_to_silence() {
        assert_eq!(float_to_int16(&[f32::NAN]), vec![0]);
    }

    #[test]
    fn int16_boundaries_map_to_unit_range() {
        let out = int16_to_float(&[i16::MIN, i16::MAX, 0]);
        assert_eq!(out, vec![-1.0, 1.0, 0.0]);
    }

    #[test]
    fn full_scale_sine_round_trip_stays_within_quantization_noise() {
        let original = sine(440.0, 16_000, 16_000, 1.0);
        let restored = int16_to_float(&float_to_int16(&original));
        let err: Vec<f32> = original
            .iter()
            .zip(&restored)
            .map(|(a, b)| a - b)
            .collect();
        assert!(rms(&err) < 1e-3, "rms error {}", rms(&err));
        assert_abs_diff_eq!(rms(&original), std::f32::consts::FRAC_1_SQRT_2, epsilon = 0.01);
    }

    #[test]
    fn resample_identity_when_rates_match() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&input, 16_000, 16_000), input);
    }

    #[test]
    fn resample_output_length_is_rounded_ratio() {
        assert_eq!(resample(&vec![0.0; 1_000], 48_000, 16_000).len(), 333);
        assert_eq!(resample(&vec![0.0; 1_001], 16_000, 24_000).len(), 1_502);
    }

    #[test]
    fn resample_interpolates_between_neighbors() {
        let out = resample(&[0.0, 1.0], 1, 2);
        assert_eq!(out.len(), 4);
        assert_abs_diff_eq!(out[1], 0.5, epsilon = 1e-6);
        // Past the last input sample the value holds.
        assert_abs_diff_eq!(out[3], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn rms_of_empty_is_zero() {
        assert_eq!(rms(&[]), 0.0);
        assert_abs_diff_eq!(rms(&[0.5, -0.5, 0.5, -0.5]), 0.5, epsilon = 1e-6);
    }
}
