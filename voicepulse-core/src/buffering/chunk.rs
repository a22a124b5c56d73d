//! Typed audio buffer passed between capture, VAD and feature extraction.

/// A contiguous block of mono PCM samples at a known sample rate.
///
/// Once captured a chunk is never mutated; stages take ownership or borrow it.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Mono f32 samples, nominally in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g. 16000, 24000, 48000).
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// An empty buffer at `sample_rate`.
    pub fn empty(sample_rate: u32) -> Self {
        Self::new(Vec::new(), sample_rate)
    }

    /// Returns the duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Returns true if the chunk contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Copy of the samples between `start` and `end` seconds, clamped to the buffer.
    pub fn slice_secs(&self, start: f64, end: f64) -> Vec<f32> {
        let rate = self.sample_rate as f64;
        let len = self.samples.len();
        let from = ((start.max(0.0) * rate).round() as usize).min(len);
        let to = ((end.max(0.0) * rate).round() as usize).clamp(from, len);
        self.samples[from..to].to_vec()
    }
}
