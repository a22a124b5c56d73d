use thiserror::Error;

/// All errors produced by voicepulse-core.
#[derive(Debug, Error)]
pub enum PulseError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    /// A capability the caller asked for is not present in this runtime.
    #[error("environment error: {0}")]
    Environment(String),

    #[error("unsupported sample rate {actual} Hz (expected {expected} Hz)")]
    UnsupportedSampleRate { expected: u32, actual: u32 },

    #[error("sample rate mismatch: extractor configured for {expected} Hz, buffer is {actual} Hz")]
    SampleRateMismatch { expected: u32, actual: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Empty audio payload")]
    EmptyPayload,

    #[error("Audio payload too large: {len} bytes exceeds maximum size of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Invalid base64 audio payload: {0}")]
    InvalidBase64(String),

    #[error("invalid WAV data: {0}")]
    InvalidWav(String),

    #[error("cannot {operation} recorder while it is {state}")]
    InvalidRecorderState {
        operation: &'static str,
        state: crate::recorder::RecorderState,
    },

    #[error("Failed to process audio: {source}")]
    Processing {
        #[source]
        source: Box<PulseError>,
    },

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("ONNX session error: {0}")]
    OnnxSession(String),

    #[error("playback worklet has shut down")]
    PlaybackClosed,

    #[error("live session unavailable: {0}")]
    SessionUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PulseError {
    /// Wrap a feature-extraction failure with pipeline context.
    pub fn processing(source: PulseError) -> Self {
        PulseError::Processing {
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, PulseError>;
