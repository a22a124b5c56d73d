//! Canonical 44-byte RIFF/WAVE framing (PCM, mono, 16-bit).
//!
//! ```text
//! 0   "RIFF"          4  riff size (36 + data)   8  "WAVE"
//! 12  "fmt "          16 16 (fmt chunk size)     20 1 (PCM)
//! 22  channels = 1    24 sample rate             28 byte rate
//! 32  block align = 2 34 bits per sample = 16
//! 36  "data"          40 data length             44 payload
//! ```

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use super::pcm::{float_to_int16, int16_to_float};
use crate::buffering::chunk::AudioChunk;
use crate::error::{PulseError, Result};

/// Size of the canonical header written by [`wav_bytes`].
pub const WAV_HEADER_LEN: usize = 44;

const CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;
const BLOCK_ALIGN: u16 = CHANNELS * BITS_PER_SAMPLE / 8;

/// Build a complete WAV file in memory from float samples.
pub fn wav_bytes(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let pcm = float_to_int16(samples);
    let data_len = (pcm.len() * 2) as u32;
    let riff_len = 36u32 + data_len;
    let byte_rate = sample_rate * BLOCK_ALIGN as u32;

    let mut out = Vec::with_capacity(WAV_HEADER_LEN + pcm.len() * 2);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&riff_len.to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&CHANNELS.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&BLOCK_ALIGN.to_le_bytes());
    out.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for sample in pcm {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Base64-encoded WAV file, ready for an upload body.
pub fn wav_encode(samples: &[f32], sample_rate: u32) -> String {
    BASE64.encode(wav_bytes(samples, sample_rate))
}

/// Decode any WAV `hound` understands into a mono [`AudioChunk`].
///
/// Multi-channel input is downmixed by averaging.
pub fn decode_wav(bytes: &[u8]) -> Result<AudioChunk> {
    let mut reader =
        hound::WavReader::new(Cursor::new(bytes)).map_err(|e| PulseError::InvalidWav(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| PulseError::InvalidWav(e.to_string()))?,
        hound::SampleFormat::Int if spec.bits_per_sample == 16 => {
            let pcm = reader
                .samples::<i16>()
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| PulseError::InvalidWav(e.to_string()))?;
            int16_to_float(&pcm)
        }
        // 8, 24 and 32 bit: scale by the format's own full-scale value.
        hound::SampleFormat::Int => {
            let max = ((1_i64 << (spec.bits_per_sample - 1)) - 1) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| PulseError::InvalidWav(e.to_string()))?
        }
    };

    if channels == 1 {
        return Ok(AudioChunk::new(interleaved, spec.sample_rate));
    }

    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    Ok(AudioChunk::new(mono, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u16_at(bytes: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
    }

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ])
    }

    #[test]
    fn empty_input_is_header_only() {
        let bytes = wav_bytes(&[], 16_000);
        assert_eq!(bytes.len(), WAV_HEADER_LEN);
        assert_eq!(u32_at(&bytes, 40), 0);
        assert_eq!(u32_at(&bytes, 4), 36);
    }

    #[test]
    fn header_fields_sit_at_canonical_offsets() {
        let bytes = wav_bytes(&[0.0, 0.5, -0.5], 24_000);
        assert_eq!(bytes.len(), WAV_HEADER_LEN + 6);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[12..16], b"fmt ");
        assert_eq!(u16_at(&bytes, 20), 1);
        assert_eq!(u16_at(&bytes, 22), 1);
        assert_eq!(u32_at(&bytes, 24), 24_000);
        assert_eq!(u32_at(&bytes, 28), 48_000);
        assert_eq!(u16_at(&bytes, 32), 2);
        assert_eq!(u16_at(&bytes, 34), 16);
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(u32_at(&bytes, 40), 6);
    }

    #[test]
    fn encoded_size_is_header_plus_two_bytes_per_sample() {
        let encoded = wav_encode(&vec![0.25; 100], 16_000);
        let decoded = BASE64.decode(encoded).unwrap();
        assert_eq!(decoded.len(), WAV_HEADER_LEN + 200);
    }

    #[test]
    fn hound_reads_back_what_we_write() {
        let samples: Vec<f32> = (0..64).map(|i| (i as f32 / 64.0) - 0.5).collect();
        let chunk = decode_wav(&wav_bytes(&samples, 16_000)).unwrap();
        assert_eq!(chunk.sample_rate, 16_000);
        assert_eq!(chunk.samples.len(), samples.len());
        for (a, b) in samples.iter().zip(&chunk.samples) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn eight_bit_input_uses_its_own_full_scale() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 8,
            sample_format: hound::SampleFormat::Int,
        };
        let mut bytes = Vec::new();
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec).unwrap();
            for s in [127i8, -64, 0, 127] {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }

        let chunk = decode_wav(&bytes).unwrap();
        assert_eq!(chunk.sample_rate, 8_000);
        assert_eq!(chunk.len(), 4);
        assert!(chunk.samples[0] > 0.99, "{}", chunk.samples[0]);
        assert!((chunk.samples[1] + 0.5).abs() < 0.01, "{}", chunk.samples[1]);
        assert_eq!(chunk.samples[2], 0.0);
    }

    #[test]
    fn garbage_is_reported_as_invalid_wav() {
        assert!(matches!(
            decode_wav(b"definitely not a wav file"),
            Err(PulseError::InvalidWav(_))
        ));
    }
}
