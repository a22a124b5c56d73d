//! # voicepulse-core
//!
//! Voice-biomarker audio pipeline: capture, speech detection, acoustic
//! feature extraction and streamed playback.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → CaptureSink → SPSC RingBuffer → capture thread → AudioChunk
//!                                                                   │
//!                                              AudioProcessor::process
//!                                                   │           │
//!                                         segment_speech   FeatureExtractor
//!                                                   └─────┬─────┘
//!                                                  ProcessingResult
//!
//! wire (base64 PCM16) → PlaybackProducer → crossbeam → PlaybackWorklet → speaker
//! ```
//!
//! The capture callback never allocates or locks; heap work happens on the
//! capture thread, the caller's task or tokio's blocking pool. The playback
//! callback frees the chunk buffers it drains and grows its queue only past
//! the high-water mark.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod playback;
pub mod recorder;
pub mod session;
pub mod vad;

// Convenience re-exports for downstream crates
pub use buffering::chunk::AudioChunk;
pub use config::PipelineConfig;
pub use engine::{
    validate_audio_data, AudioProcessor, ProcessingMetadata, ProcessingResult, ProcessorConfig,
};
pub use error::{PulseError, Result};
pub use features::{AudioFeatures, FeatureConfig, FeatureExtractor};
pub use playback::{PlaybackConfig, PlaybackEvent, PlaybackProducer, PlaybackWorklet};
pub use recorder::{
    AudioRecorder, CaptureConstraints, CaptureFault, CaptureSource, RecorderConfig, RecorderState,
};
pub use session::{LiveSession, SessionSlot};
pub use vad::{segment_speech, SpeechSegment, VadOptions};

#[cfg(feature = "onnx")]
pub use vad::SileroVad;
