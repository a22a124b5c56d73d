//! Streaming sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! Input devices run at their native rate (commonly 44.1 or 48 kHz). The
//! recorder hands feature extraction a buffer at the configured rate, so the
//! drain thread pushes every popped block through a `RateConverter` and
//! flushes the remainder when the recording stops.
//!
//! When device rate == target rate no rubato session is created at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{PulseError, Result};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` in passthrough mode.
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input chunks between calls.
    input_buf: Vec<f32>,
    chunk_size: usize,
    /// `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
    ratio: f64,
}

impl RateConverter {
    /// # Errors
    /// `PulseError::InvalidConfig` for a zero rate or chunk size,
    /// `PulseError::AudioDevice` if rubato fails to initialise.
    pub fn new(device_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if device_rate == 0 || target_rate == 0 || chunk_size == 0 {
            return Err(PulseError::InvalidConfig(format!(
                "cannot convert {device_rate} Hz → {target_rate} Hz in chunks of {chunk_size}"
            )));
        }
        let ratio = target_rate as f64 / device_rate as f64;

        if device_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
                ratio,
            });
        }

        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
            .map_err(|e| PulseError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::info!(device_rate, target_rate, chunk_size, "capture resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::with_capacity(chunk_size * 2),
            chunk_size,
            output_buf,
            ratio,
        })
    }

    /// Process incoming samples, returning resampled output (may be empty).
    ///
    /// Samples accumulate until a full `chunk_size` block is available; any
    /// remainder is kept for the next call or for [`flush`](Self::flush).
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);
        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];
            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => error!("resampler process error: {e}"),
            }
            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Convert whatever partial chunk is still buffered.
    ///
    /// Output is trimmed to the length the pending input represents at the
    /// target rate, so the zero padding rubato adds never reaches the caller.
    pub fn flush(&mut self) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return Vec::new();
        };
        if self.input_buf.is_empty() {
            return Vec::new();
        }

        let pending = std::mem::take(&mut self.input_buf);
        let expected = (pending.len() as f64 * self.ratio).round() as usize;
        match resampler.process_partial_into_buffer(
            Some(&[pending.as_slice()]),
            &mut self.output_buf,
            None,
        ) {
            Ok((_consumed, produced)) => self.output_buf[0][..produced.min(expected)].to_vec(),
            Err(e) => {
                error!("resampler flush error: {e}");
                Vec::new()
            }
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}
