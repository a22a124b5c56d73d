//! `AudioRecorder`: microphone capture into one contiguous recording.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ─start()─► Requesting ─(device open)─► Recording ─stop()─► Stopping ─► Idle
//!                     │                           │                  │
//!                     └──────── failure ──────────┴──────────────────┴─► Error
//! ```
//!
//! `cancel()` tears down from any non-idle state (including `Error`) and
//! returns to `Idle` without producing audio.
//!
//! ## Threading
//!
//! The platform stream is `!Send`, so it is opened *inside* the capture
//! thread and dropped there. A sync oneshot channel reports the open result
//! back to `start()`. The device callback only pushes into the SPSC ring; the
//! capture thread drains the ring, converts the rate, appends to the
//! recording and offers a copy of each block to subscribers with `try_send`.

use std::fmt;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    audio::resample::RateConverter,
    buffering::{
        chunk::AudioChunk, create_audio_ring_with_capacity, AudioConsumer, AudioProducer, Consumer,
        Producer, RING_CAPACITY,
    },
    error::{PulseError, Result},
};

/// How long the drain loop sleeps when the ring is empty.
const DRAIN_IDLE: Duration = Duration::from_millis(5);
/// Samples popped from the ring per drain iteration.
const DRAIN_BLOCK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecorderState {
    Idle,
    Requesting,
    Recording,
    Stopping,
    Error,
}

impl fmt::Display for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecorderState::Idle => "idle",
            RecorderState::Requesting => "requesting",
            RecorderState::Recording => "recording",
            RecorderState::Stopping => "stopping",
            RecorderState::Error => "in an error state",
        };
        f.write_str(name)
    }
}

/// Requested capture characteristics.
///
/// cpal exposes no echo cancellation, noise suppression or gain control; the
/// flags are carried for backends that do and logged when a stream opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct CaptureConstraints {
    /// Preferred device rate. The device default is used when unsupported.
    pub sample_rate: Option<u32>,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    /// Input device name; `None` selects the system default.
    pub preferred_device: Option<String>,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            sample_rate: Some(16_000),
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            preferred_device: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct RecorderConfig {
    /// Rate of the recording handed back by `stop()`.
    pub sample_rate: u32,
    /// Input frames per resampler call.
    pub resample_chunk: usize,
    /// SPSC ring capacity in samples.
    pub ring_capacity: usize,
    pub constraints: CaptureConstraints,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            resample_chunk: 960,
            ring_capacity: RING_CAPACITY,
            constraints: CaptureConstraints::default(),
        }
    }
}

/// Destination handed to a [`CaptureSource`] when its stream opens.
///
/// `push` is lock-free and allocation-free, safe for a real-time callback.
pub struct CaptureSink {
    producer: AudioProducer,
    running: Arc<AtomicBool>,
    overflow: Arc<AtomicU64>,
    fault: CaptureFault,
}

impl CaptureSink {
    /// Push mono f32 samples. Samples that do not fit are counted as overflow.
    pub fn push(&mut self, samples: &[f32]) {
        if !self.running.load(Ordering::Relaxed) {
            return;
        }
        let written = self.producer.push_slice(samples);
        if written < samples.len() {
            self.overflow
                .fetch_add((samples.len() - written) as u64, Ordering::Relaxed);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Handle for the stream's error callback.
    pub fn fault(&self) -> CaptureFault {
        self.fault.clone()
    }
}

/// Platform failure reported by an open stream.
///
/// The capture thread ends the recording with an error once a fault is set.
/// Only the first report is kept.
#[derive(Debug, Clone, Default)]
pub struct CaptureFault(Arc<Mutex<Option<String>>>);

impl CaptureFault {
    pub fn report(&self, message: impl Into<String>) {
        let mut slot = self.0.lock();
        if slot.is_none() {
            *slot = Some(message.into());
        }
    }

    pub fn is_set(&self) -> bool {
        self.0.lock().is_some()
    }

    fn message(&self) -> Option<String> {
        self.0.lock().clone()
    }
}

/// An open platform stream. Dropping it releases the device.
pub trait CaptureStream {
    /// Rate at which the stream delivers samples into the sink.
    fn sample_rate(&self) -> u32;
}

/// Something that can open a microphone stream (cpal device, test script...).
pub trait CaptureSource: Send + Sync {
    /// Open a stream that pushes mono samples into `sink`.
    ///
    /// Called on the capture thread, which also drops the returned stream.
    fn open(&self, constraints: &CaptureConstraints, sink: CaptureSink) -> Result<Box<dyn CaptureStream>>;
}

/// Capture counters, shared with the capture thread.
#[derive(Debug, Default)]
pub struct RecorderDiagnostics {
    pub samples_recorded: AtomicU64,
    pub chunks_delivered: AtomicU64,
    pub chunks_dropped: AtomicU64,
    pub ring_overflow_samples: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderDiagnosticsSnapshot {
    pub samples_recorded: u64,
    pub chunks_delivered: u64,
    pub chunks_dropped: u64,
    pub ring_overflow_samples: u64,
}

impl RecorderDiagnostics {
    pub fn reset(&self) {
        self.samples_recorded.store(0, Ordering::Relaxed);
        self.chunks_delivered.store(0, Ordering::Relaxed);
        self.chunks_dropped.store(0, Ordering::Relaxed);
        self.ring_overflow_samples.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RecorderDiagnosticsSnapshot {
        RecorderDiagnosticsSnapshot {
            samples_recorded: self.samples_recorded.load(Ordering::Relaxed),
            chunks_delivered: self.chunks_delivered.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            ring_overflow_samples: self.ring_overflow_samples.load(Ordering::Relaxed),
        }
    }
}

type Subscribers = Arc<Mutex<Vec<Sender<AudioChunk>>>>;

/// Running capture thread.
struct ActiveCapture {
    running: Arc<AtomicBool>,
    fault: CaptureFault,
    thread: JoinHandle<Result<Vec<f32>>>,
}

pub struct AudioRecorder {
    config: RecorderConfig,
    source: Arc<dyn CaptureSource>,
    state: RecorderState,
    active: Option<ActiveCapture>,
    subscribers: Subscribers,
    diagnostics: Arc<RecorderDiagnostics>,
}

impl AudioRecorder {
    pub fn new(config: RecorderConfig, source: Box<dyn CaptureSource>) -> Self {
        Self {
            config,
            source: Arc::from(source),
            state: RecorderState::Idle,
            active: None,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            diagnostics: Arc::new(RecorderDiagnostics::default()),
        }
    }

    /// Recorder wired to the default cpal input device.
    #[cfg(feature = "audio-cpal")]
    pub fn with_default_device(config: RecorderConfig) -> Self {
        Self::new(config, Box::new(crate::audio::CpalCaptureSource))
    }

    /// Current state. A recording whose device has failed reports `Error`
    /// before `stop()` collects the failure.
    pub fn state(&self) -> RecorderState {
        match &self.active {
            Some(active) if active.fault.is_set() => RecorderState::Error,
            _ => self.state,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.state() == RecorderState::Recording
    }

    pub fn diagnostics_snapshot(&self) -> RecorderDiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Stream of recorded blocks at the recording rate.
    ///
    /// Delivery uses `try_send`: a subscriber that falls `capacity` blocks
    /// behind loses copies, never recording data.
    pub fn subscribe(&mut self, capacity: usize) -> Receiver<AudioChunk> {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        self.subscribers.lock().push(tx);
        rx
    }

    /// Open the input device and begin recording.
    ///
    /// Blocks until the device is confirmed open (or fails).
    ///
    /// # Errors
    /// - `PulseError::InvalidRecorderState` unless idle.
    /// - Any error from opening the device; the recorder is then in `Error`.
    pub fn start(&mut self) -> Result<()> {
        self.require("start", &[RecorderState::Idle])?;
        self.state = RecorderState::Requesting;
        self.diagnostics.reset();

        let (producer, consumer) = create_audio_ring_with_capacity(self.config.ring_capacity);
        let running = Arc::new(AtomicBool::new(true));
        let fault = CaptureFault::default();
        let sink = CaptureSink {
            producer,
            running: Arc::clone(&running),
            overflow: Arc::clone(&self.diagnostics.ring_overflow_samples),
            fault: fault.clone(),
        };

        let ctx = CaptureContext {
            source: Arc::clone(&self.source),
            config: self.config.clone(),
            consumer,
            running: Arc::clone(&running),
            fault: fault.clone(),
            subscribers: Arc::clone(&self.subscribers),
            diagnostics: Arc::clone(&self.diagnostics),
        };

        // Sync oneshot: capture thread reports open success (device rate) or failure.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        let thread = std::thread::Builder::new()
            .name("voicepulse-capture".into())
            .spawn(move || capture_loop(ctx, sink, open_tx))
            .map_err(|e| {
                self.state = RecorderState::Error;
                PulseError::AudioStream(format!("failed to spawn capture thread: {e}"))
            })?;

        match open_rx.recv() {
            Ok(Ok(device_rate)) => {
                self.active = Some(ActiveCapture {
                    running,
                    fault,
                    thread,
                });
                self.state = RecorderState::Recording;
                info!(device_rate, target_rate = self.config.sample_rate, "recording started");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                self.state = RecorderState::Error;
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                self.state = RecorderState::Error;
                Err(PulseError::Other(anyhow::anyhow!(
                    "capture thread died before opening the device"
                )))
            }
        }
    }

    /// Stop recording and return everything captured since `start()`.
    ///
    /// # Errors
    /// - `PulseError::InvalidRecorderState` unless recording.
    /// - The device failure reported during capture, or the capture thread's
    ///   own error; the recorder is then in `Error`.
    pub fn stop(&mut self) -> Result<AudioChunk> {
        self.require("stop", &[RecorderState::Recording])?;
        self.state = RecorderState::Stopping;

        let Some(active) = self.active.take() else {
            self.state = RecorderState::Error;
            return Err(PulseError::Other(anyhow::anyhow!(
                "recorder lost its capture thread"
            )));
        };

        match join_capture(active) {
            Ok(samples) => {
                self.state = RecorderState::Idle;
                let chunk = AudioChunk::new(samples, self.config.sample_rate);
                info!(
                    seconds = chunk.duration_secs(),
                    dropped_copies = self.diagnostics.chunks_dropped.load(Ordering::Relaxed),
                    "recording stopped"
                );
                Ok(chunk)
            }
            Err(e) => {
                self.state = RecorderState::Error;
                Err(e)
            }
        }
    }

    /// Abort the current recording (or clear an error) and return to idle.
    ///
    /// # Errors
    /// `PulseError::InvalidRecorderState` when already idle.
    pub fn cancel(&mut self) -> Result<()> {
        if self.state == RecorderState::Idle {
            return Err(PulseError::InvalidRecorderState {
                operation: "cancel",
                state: self.state,
            });
        }
        if let Some(active) = self.active.take() {
            if let Err(e) = join_capture(active) {
                warn!("capture thread ended with an error during cancel: {e}");
            }
        }
        self.state = RecorderState::Idle;
        info!("recording cancelled");
        Ok(())
    }

    fn require(&self, operation: &'static str, allowed: &[RecorderState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(PulseError::InvalidRecorderState {
                operation,
                state: self.state,
            })
        }
    }
}

impl Drop for AudioRecorder {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = join_capture(active);
        }
    }
}

fn join_capture(active: ActiveCapture) -> Result<Vec<f32>> {
    active.running.store(false, Ordering::Release);
    active
        .thread
        .join()
        .map_err(|_| PulseError::Other(anyhow::anyhow!("capture thread panicked")))?
}

struct CaptureContext {
    source: Arc<dyn CaptureSource>,
    config: RecorderConfig,
    consumer: AudioConsumer,
    running: Arc<AtomicBool>,
    fault: CaptureFault,
    subscribers: Subscribers,
    diagnostics: Arc<RecorderDiagnostics>,
}

fn capture_loop(
    ctx: CaptureContext,
    sink: CaptureSink,
    open_tx: std::sync::mpsc::Sender<Result<u32>>,
) -> Result<Vec<f32>> {
    let CaptureContext {
        source,
        config,
        mut consumer,
        running,
        fault,
        subscribers,
        diagnostics,
    } = ctx;

    // Open on THIS thread: platform streams must be dropped where they were built.
    let opened = source.open(&config.constraints, sink).and_then(|stream| {
        let converter =
            RateConverter::new(stream.sample_rate(), config.sample_rate, config.resample_chunk)?;
        Ok((stream, converter))
    });
    let (stream, mut converter) = match opened {
        Ok(pair) => {
            let _ = open_tx.send(Ok(pair.0.sample_rate()));
            pair
        }
        Err(e) => {
            running.store(false, Ordering::Release);
            let _ = open_tx.send(Err(e));
            return Ok(Vec::new());
        }
    };

    let mut recording = Vec::with_capacity(config.sample_rate as usize * 30);
    let mut block = vec![0.0f32; DRAIN_BLOCK];
    let deliver = |samples: Vec<f32>, recording: &mut Vec<f32>| {
        if samples.is_empty() {
            return;
        }
        recording.extend_from_slice(&samples);
        diagnostics
            .samples_recorded
            .fetch_add(samples.len() as u64, Ordering::Relaxed);
        publish(
            &subscribers,
            &diagnostics,
            AudioChunk::new(samples, config.sample_rate),
        );
    };

    loop {
        if let Some(message) = fault.message() {
            running.store(false, Ordering::Release);
            drop(stream);
            warn!(samples = recording.len(), "capture device failed: {message}");
            return Err(PulseError::AudioStream(message));
        }
        let stopping = !running.load(Ordering::Acquire);
        let popped = consumer.pop_slice(&mut block);
        if popped > 0 {
            deliver(converter.process(&block[..popped]), &mut recording);
        } else if stopping {
            break;
        } else {
            std::thread::sleep(DRAIN_IDLE);
        }
    }
    deliver(converter.flush(), &mut recording);

    // Stream drops here, releasing the device on this thread.
    drop(stream);
    debug!(samples = recording.len(), "capture thread finished");
    Ok(recording)
}

fn publish(subscribers: &Subscribers, diagnostics: &RecorderDiagnostics, chunk: AudioChunk) {
    let mut subs = subscribers.lock();
    if subs.is_empty() {
        return;
    }
    subs.retain(|tx| match tx.try_send(chunk.clone()) {
        Ok(()) => {
            diagnostics.chunks_delivered.fetch_add(1, Ordering::Relaxed);
            true
        }
        Err(TrySendError::Full(_)) => {
            let dropped = diagnostics.chunks_dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped.is_power_of_two() {
                warn!(dropped, "recording subscriber is lagging; dropping stream copies");
            }
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    });
}
