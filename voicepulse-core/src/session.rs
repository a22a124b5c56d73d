//! Live voice-session context.
//!
//! A [`LiveSession`] couples the outbound wire encoder (recorded audio →
//! base64 PCM16 at 16 kHz) with the inbound [`PlaybackProducer`]. Whoever
//! prepares a session parks it in a [`SessionSlot`]; the party that starts
//! the conversation consumes it exactly once.

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    buffering::chunk::AudioChunk,
    codec::{float_to_int16, int16_to_base64, resample},
    error::{PulseError, Result},
    playback::PlaybackProducer,
};

/// Rate of outbound wire audio.
pub const WIRE_SAMPLE_RATE: u32 = 16_000;

#[derive(Debug)]
pub struct LiveSession {
    id: String,
    playback: PlaybackProducer,
}

impl LiveSession {
    pub fn new(id: impl Into<String>, playback: PlaybackProducer) -> Self {
        Self {
            id: id.into(),
            playback,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn playback(&self) -> &PlaybackProducer {
        &self.playback
    }

    /// Encode recorded audio as a wire payload: 16 kHz, PCM16, base64.
    ///
    /// # Errors
    /// `PulseError::EmptyPayload` for an empty chunk, `PulseError::InvalidConfig`
    /// for a chunk without a sample rate.
    pub fn encode_outbound(&self, chunk: &AudioChunk) -> Result<String> {
        if chunk.is_empty() {
            return Err(PulseError::EmptyPayload);
        }
        if chunk.sample_rate == 0 {
            return Err(PulseError::InvalidConfig(
                "cannot encode outbound audio with a 0 Hz sample rate".into(),
            ));
        }
        let samples = resample(&chunk.samples, chunk.sample_rate, WIRE_SAMPLE_RATE);
        let payload = int16_to_base64(&float_to_int16(&samples));
        debug!(session = %self.id, samples = samples.len(), "encoded outbound audio");
        Ok(payload)
    }

    /// Queue an inbound base64 PCM16 payload for playback.
    pub fn play_inbound(&self, payload: &str) -> Result<()> {
        self.playback.push_base64(payload)
    }
}

/// Holder for at most one pending [`LiveSession`].
#[derive(Debug, Default)]
pub struct SessionSlot {
    inner: Mutex<Option<LiveSession>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park `session` in the slot.
    ///
    /// # Errors
    /// `PulseError::SessionUnavailable` when a session is already parked.
    pub fn create(&self, session: LiveSession) -> Result<()> {
        let mut slot = self.inner.lock();
        if let Some(existing) = slot.as_ref() {
            return Err(PulseError::SessionUnavailable(format!(
                "session {} is already pending",
                existing.id
            )));
        }
        info!(session = %session.id, "live session created");
        *slot = Some(session);
        Ok(())
    }

    /// Take the pending session. Subsequent calls return `None`.
    pub fn consume(&self) -> Option<LiveSession> {
        let session = self.inner.lock().take();
        if let Some(s) = &session {
            info!(session = %s.id, "live session consumed");
        }
        session
    }

    /// Discard any pending session without using it.
    pub fn invalidate(&self) {
        if let Some(s) = self.inner.lock().take() {
            info!(session = %s.id, "live session invalidated");
        }
    }

    pub fn is_pending(&self) -> bool {
        self.inner.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::base64_to_int16;
    use crate::playback::{channel, PlaybackConfig};

    fn session(id: &str) -> (LiveSession, crate::playback::PlaybackWorklet) {
        let (producer, worklet) = channel(PlaybackConfig::default());
        (LiveSession::new(id, producer), worklet)
    }

    #[test]
    fn consume_yields_the_session_once() {
        let slot = SessionSlot::new();
        let (s, _worklet) = session("a");
        slot.create(s).unwrap();
        assert!(slot.is_pending());
        assert_eq!(slot.consume().map(|s| s.id().to_string()), Some("a".into()));
        assert!(slot.consume().is_none());
    }

    #[test]
    fn occupied_slot_rejects_second_session() {
        let slot = SessionSlot::new();
        let (a, _wa) = session("a");
        let (b, _wb) = session("b");
        slot.create(a).unwrap();
        assert!(matches!(
            slot.create(b),
            Err(PulseError::SessionUnavailable(_))
        ));
    }

    #[test]
    fn invalidate_clears_the_slot() {
        let slot = SessionSlot::new();
        let (s, _worklet) = session("a");
        slot.create(s).unwrap();
        slot.invalidate();
        assert!(slot.consume().is_none());
    }

    #[test]
    fn outbound_audio_is_16k_pcm16() {
        let (s, _worklet) = session("a");
        let chunk = AudioChunk::new(vec![0.5; 4_800], 48_000);
        let payload = s.encode_outbound(&chunk).unwrap();
        let pcm = base64_to_int16(&payload).unwrap();
        assert_eq!(pcm.len(), 1_600);
        assert!(pcm.iter().all(|&v| v == 16_383));
        assert!(matches!(
            s.encode_outbound(&AudioChunk::empty(16_000)),
            Err(PulseError::EmptyPayload)
        ));
    }

    #[test]
    fn outbound_audio_without_a_rate_is_rejected() {
        let (s, _worklet) = session("a");
        let err = s
            .encode_outbound(&AudioChunk::new(vec![0.5; 160], 0))
            .unwrap_err();
        assert!(matches!(err, PulseError::InvalidConfig(_)));
    }

    #[test]
    fn inbound_audio_reaches_playback() {
        let (s, mut worklet) = session("a");
        s.play_inbound("AQD//w==").unwrap();
        let mut out = [0.0f32; 2];
        worklet.render(&mut out);
        assert!(out[0] > 0.0 && out[1] < 0.0);
    }
}
