//! PCM codec: sample format conversion, wire encoding and WAV framing.
//!
//! Everything here is pure and allocation-only; the one side effect is a
//! `tracing` warning when a PCM payload has to be auto-corrected.

pub mod pcm;
pub mod wav;
pub mod wire;

pub use pcm::{float_to_int16, int16_to_float, resample, rms};
pub use wav::{decode_wav, wav_bytes, wav_encode, WAV_HEADER_LEN};
pub use wire::{base64_to_int16, int16_to_base64, MAX_BASE64_PAYLOAD_LEN};
