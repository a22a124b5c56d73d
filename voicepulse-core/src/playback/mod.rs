//! Streamed PCM playback: a message-fed queue drained by the output device.
//!
//! ```text
//! network / caller ─► PlaybackProducer ──(crossbeam, unbounded)──► PlaybackWorklet::render ─► device
//!                          ▲                                               │
//!                          └─────────(PlaybackEvent, bounded)──────────────┘
//! ```
//!
//! The producer never blocks and the worklet never drops queued audio. When
//! the queue grows past `high_water_seconds` the worklet signals
//! [`PlaybackEvent::Backpressure`] so the producer side can slow down; it
//! keeps every chunk regardless.
//!
//! The queue is reserved up to the high-water mark, so `render` only
//! reallocates once the producer ignores backpressure. Drained chunk buffers
//! are released on the rendering thread.

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    codec::{base64_to_int16, int16_to_float},
    error::{PulseError, Result},
};

/// Pending events kept for the producer side; older signals win.
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct PlaybackConfig {
    pub sample_rate: u32,
    /// Queue depth (seconds) above which backpressure is signalled.
    pub high_water_seconds: f32,
    /// Queue depth (seconds) below which backpressure is lifted.
    pub low_water_seconds: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            high_water_seconds: 30.0,
            low_water_seconds: 10.0,
        }
    }
}

impl PlaybackConfig {
    fn water_marks(&self) -> (usize, usize) {
        let rate = self.sample_rate.max(1) as f32;
        let high = (self.high_water_seconds.max(0.0) * rate) as usize;
        let low = ((self.low_water_seconds.max(0.0) * rate) as usize).min(high);
        (high.max(1), low)
    }
}

/// Messages from producer to worklet.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackMessage {
    Chunk(Vec<f32>),
    Clear,
}

/// Signals from worklet to producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlaybackEvent {
    #[serde(rename_all = "camelCase")]
    Backpressure { queued_samples: usize },
    #[serde(rename_all = "camelCase")]
    Resumed { queued_samples: usize },
    /// An output block ran dry after audio had been queued.
    #[serde(rename_all = "camelCase")]
    Underrun { missing_samples: usize },
}

/// Playback counters, shared between producer and worklet.
#[derive(Debug, Default)]
pub struct PlaybackDiagnostics {
    pub chunks_sent: AtomicU64,
    pub chunks_received: AtomicU64,
    pub samples_rendered: AtomicU64,
    pub underruns: AtomicU64,
    pub events_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackDiagnosticsSnapshot {
    pub chunks_sent: u64,
    pub chunks_received: u64,
    pub samples_rendered: u64,
    pub underruns: u64,
    pub events_dropped: u64,
}

impl PlaybackDiagnostics {
    pub fn snapshot(&self) -> PlaybackDiagnosticsSnapshot {
        PlaybackDiagnosticsSnapshot {
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            samples_rendered: self.samples_rendered.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Create a connected producer/worklet pair.
pub fn channel(config: PlaybackConfig) -> (PlaybackProducer, PlaybackWorklet) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let (events_tx, events_rx) = crossbeam_channel::bounded(EVENT_CAPACITY);
    let diagnostics = Arc::new(PlaybackDiagnostics::default());
    let (high_water, low_water) = config.water_marks();

    debug!(
        sample_rate = config.sample_rate,
        high_water, low_water, "playback channel created"
    );

    let producer = PlaybackProducer {
        tx,
        events: events_rx,
        diagnostics: Arc::clone(&diagnostics),
        sample_rate: config.sample_rate,
    };
    let worklet = PlaybackWorklet {
        rx,
        events: events_tx,
        queue: VecDeque::with_capacity(high_water),
        high_water,
        low_water,
        backpressured: false,
        primed: false,
        diagnostics,
        sample_rate: config.sample_rate,
    };
    (producer, worklet)
}

/// Sending half. Cheap to clone; never blocks.
#[derive(Debug, Clone)]
pub struct PlaybackProducer {
    tx: Sender<PlaybackMessage>,
    events: Receiver<PlaybackEvent>,
    diagnostics: Arc<PlaybackDiagnostics>,
    sample_rate: u32,
}

impl PlaybackProducer {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Queue f32 samples. Empty input is a no-op.
    ///
    /// # Errors
    /// `PulseError::PlaybackClosed` when the worklet has been dropped.
    pub fn push_samples(&self, samples: Vec<f32>) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        self.send(PlaybackMessage::Chunk(samples))?;
        self.diagnostics.chunks_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn push_pcm16(&self, pcm: &[i16]) -> Result<()> {
        self.push_samples(int16_to_float(pcm))
    }

    /// Decode a base64 PCM16 wire payload and queue it.
    ///
    /// # Errors
    /// Any wire-format error from [`base64_to_int16`], or `PlaybackClosed`.
    pub fn push_base64(&self, payload: &str) -> Result<()> {
        let pcm = base64_to_int16(payload)?;
        self.push_pcm16(&pcm)
    }

    /// Drop everything queued but not yet rendered.
    pub fn clear(&self) -> Result<()> {
        self.send(PlaybackMessage::Clear)
    }

    /// Backpressure / underrun signals from the worklet.
    pub fn events(&self) -> Receiver<PlaybackEvent> {
        self.events.clone()
    }

    pub fn diagnostics_snapshot(&self) -> PlaybackDiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    fn send(&self, message: PlaybackMessage) -> Result<()> {
        self.tx.send(message).map_err(|_| PulseError::PlaybackClosed)
    }
}

/// Receiving half, owned by the output-device thread.
pub struct PlaybackWorklet {
    rx: Receiver<PlaybackMessage>,
    events: Sender<PlaybackEvent>,
    queue: VecDeque<f32>,
    high_water: usize,
    low_water: usize,
    backpressured: bool,
    /// Audio arrived since the last underrun.
    primed: bool,
    diagnostics: Arc<PlaybackDiagnostics>,
    sample_rate: u32,
}

impl PlaybackWorklet {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn queued_samples(&self) -> usize {
        self.queue.len()
    }

    /// Fill `out` with queued audio, zero-filling whatever is missing.
    ///
    /// Never blocks. Safe to call from a device callback.
    pub fn render(&mut self, out: &mut [f32]) {
        self.drain_messages();

        if !self.backpressured && self.queue.len() > self.high_water {
            self.backpressured = true;
            self.emit(PlaybackEvent::Backpressure {
                queued_samples: self.queue.len(),
            });
        }

        let available = out.len().min(self.queue.len());
        for (slot, sample) in out.iter_mut().zip(self.queue.drain(..available)) {
            *slot = sample;
        }
        out[available..].fill(0.0);

        if available < out.len() && self.primed {
            self.primed = false;
            self.diagnostics.underruns.fetch_add(1, Ordering::Relaxed);
            self.emit(PlaybackEvent::Underrun {
                missing_samples: out.len() - available,
            });
        }

        if self.backpressured && self.queue.len() < self.low_water {
            self.backpressured = false;
            self.emit(PlaybackEvent::Resumed {
                queued_samples: self.queue.len(),
            });
        }

        self.diagnostics
            .samples_rendered
            .fetch_add(available as u64, Ordering::Relaxed);
    }

    fn drain_messages(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(PlaybackMessage::Chunk(samples)) => {
                    self.queue.extend(samples);
                    self.primed = true;
                    self.diagnostics.chunks_received.fetch_add(1, Ordering::Relaxed);
                }
                Ok(PlaybackMessage::Clear) => {
                    self.queue.clear();
                    self.primed = false;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn emit(&self, event: PlaybackEvent) {
        if self.events.try_send(event).is_err() {
            self.diagnostics.events_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Drop for PlaybackWorklet {
    fn drop(&mut self) {
        if !self.queue.is_empty() {
            warn!(
                queued = self.queue.len(),
                "playback worklet dropped with audio still queued"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> PlaybackConfig {
        PlaybackConfig {
            sample_rate: 1_000,
            high_water_seconds: 1.0,
            low_water_seconds: 0.5,
        }
    }

    #[test]
    fn renders_in_order_and_zero_fills() {
        let (producer, mut worklet) = channel(PlaybackConfig::default());
        producer.push_samples(vec![0.1, 0.2, 0.3]).unwrap();
        producer.push_samples(vec![0.4]).unwrap();

        let mut out = [9.0f32; 6];
        worklet.render(&mut out);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.4, 0.0, 0.0]);
    }

    #[test]
    fn queue_below_high_water_never_reallocates() {
        let (producer, mut worklet) = channel(small_config());
        let reserved = worklet.queue.capacity();
        assert!(reserved >= 1_000);

        for _ in 0..10 {
            producer.push_samples(vec![0.1; 100]).unwrap();
        }
        worklet.render(&mut [0.0; 10]);
        assert_eq!(worklet.queued_samples(), 990);
        assert_eq!(worklet.queue.capacity(), reserved);
    }

    #[test]
    fn silence_before_audio_is_not_an_underrun() {
        let (producer, mut worklet) = channel(PlaybackConfig::default());
        worklet.render(&mut [0.0; 128]);
        assert!(producer.events().try_recv().is_err());
        assert_eq!(producer.diagnostics_snapshot().underruns, 0);
    }

    #[test]
    fn underrun_is_reported_once_per_starvation() {
        let (producer, mut worklet) = channel(PlaybackConfig::default());
        producer.push_samples(vec![0.5; 100]).unwrap();
        worklet.render(&mut [0.0; 128]);
        worklet.render(&mut [0.0; 128]);

        let events: Vec<_> = producer.events().try_iter().collect();
        assert_eq!(events, vec![PlaybackEvent::Underrun { missing_samples: 28 }]);
        assert_eq!(producer.diagnostics_snapshot().underruns, 1);
    }

    #[test]
    fn backpressure_is_signalled_and_lifted_without_dropping() {
        let (producer, mut worklet) = channel(small_config());
        for _ in 0..15 {
            producer.push_samples(vec![0.25; 100]).unwrap();
        }
        worklet.render(&mut [0.0; 100]);
        assert_eq!(
            producer.events().try_recv().unwrap(),
            PlaybackEvent::Backpressure {
                queued_samples: 1_500
            }
        );
        assert_eq!(worklet.queued_samples(), 1_400);

        let mut out = vec![0.0; 1_000];
        worklet.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.25));
        assert_eq!(
            producer.events().try_recv().unwrap(),
            PlaybackEvent::Resumed {
                queued_samples: 400
            }
        );
    }

    #[test]
    fn clear_discards_queue() {
        let (producer, mut worklet) = channel(PlaybackConfig::default());
        producer.push_samples(vec![0.5; 64]).unwrap();
        producer.clear().unwrap();
        let mut out = [1.0f32; 8];
        worklet.render(&mut out);
        assert_eq!(out, [0.0; 8]);
        assert_eq!(worklet.queued_samples(), 0);
    }

    #[test]
    fn base64_payloads_are_decoded() {
        let (producer, mut worklet) = channel(PlaybackConfig::default());
        producer.push_base64("AQD//w==").unwrap();
        let mut out = [0.0f32; 2];
        worklet.render(&mut out);
        assert_eq!(out, [1.0 / 32767.0, -1.0 / 32768.0]);

        assert!(matches!(
            producer.push_base64("not base64!!"),
            Err(PulseError::InvalidBase64(_))
        ));
    }

    #[test]
    fn push_after_worklet_drop_fails() {
        let (producer, worklet) = channel(PlaybackConfig::default());
        drop(worklet);
        assert!(matches!(
            producer.push_samples(vec![0.1]),
            Err(PulseError::PlaybackClosed)
        ));
    }

    #[test]
    fn empty_chunks_are_ignored() {
        let (producer, _worklet) = channel(PlaybackConfig::default());
        producer.push_samples(Vec::new()).unwrap();
        assert_eq!(producer.diagnostics_snapshot().chunks_sent, 0);
    }

    #[test]
    fn events_serialize_tagged() {
        let json = serde_json::to_value(PlaybackEvent::Backpressure { queued_samples: 5 }).unwrap();
        assert_eq!(json["type"], "backpressure");
        assert_eq!(json["queuedSamples"], 5);
    }
}
