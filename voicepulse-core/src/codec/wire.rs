//! Base64 PCM16 wire format used by the real-time voice session.
//!
//! Inbound payloads come from the network, so decoding validates size and
//! alphabet before touching the decoder and reports which rule failed.

use std::sync::OnceLock;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use regex::Regex;
use tracing::warn;

use crate::error::{PulseError, Result};

/// Largest accepted encoded payload (≈1 MB of raw PCM).
pub const MAX_BASE64_PAYLOAD_LEN: usize = 1_400_000;

fn base64_alphabet() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9+/]*={0,2}$").expect("static base64 pattern is valid")
    })
}

/// Encode PCM16 samples as little-endian bytes in standard base64.
pub fn int16_to_base64(samples: &[i16]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    BASE64.encode(bytes)
}

/// Decode a base64 PCM16 payload.
///
/// # Errors
/// - `PulseError::EmptyPayload` for an empty string.
/// - `PulseError::PayloadTooLarge` above [`MAX_BASE64_PAYLOAD_LEN`].
/// - `PulseError::InvalidBase64` for characters outside the alphabet, bad
///   padding, or a decoder failure.
///
/// An odd number of decoded bytes is not an error: the trailing byte is
/// dropped and a warning is logged.
pub fn base64_to_int16(payload: &str) -> Result<Vec<i16>> {
    if payload.is_empty() {
        return Err(PulseError::EmptyPayload);
    }
    if payload.len() > MAX_BASE64_PAYLOAD_LEN {
        return Err(PulseError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_BASE64_PAYLOAD_LEN,
        });
    }
    if !base64_alphabet().is_match(payload) {
        return Err(PulseError::InvalidBase64(
            "contains characters outside the base64 alphabet".into(),
        ));
    }
    if payload.len() % 4 != 0 {
        return Err(PulseError::InvalidBase64(format!(
            "length {} is not a multiple of 4",
            payload.len()
        )));
    }

    let mut bytes = BASE64
        .decode(payload)
        .map_err(|e| PulseError::InvalidBase64(e.to_string()))?;

    if bytes.len() % 2 != 0 {
        warn!(
            bytes = bytes.len(),
            "PCM16 payload has odd byte length; dropping trailing byte"
        );
        bytes.pop();
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_little_endian_bytes() {
        // 1 → [0x01, 0x00], -1 → [0xff, 0xff]
        assert_eq!(int16_to_base64(&[1, -1]), "AQD//w==");
    }

    #[test]
    fn decodes_what_it_encodes() {
        let samples = vec![0, 1, -1, i16::MAX, i16::MIN, 1234];
        assert_eq!(base64_to_int16(&int16_to_base64(&samples)).unwrap(), samples);
    }

    #[test]
    fn rejects_non_base64_with_descriptive_message() {
        let err = base64_to_int16("not base64!!").unwrap_err();
        assert!(matches!(err, PulseError::InvalidBase64(_)));
        assert!(err.to_string().contains("Invalid base64"), "{err}");
    }

    #[test]
    fn rejects_oversized_payload() {
        let payload = "A".repeat(MAX_BASE64_PAYLOAD_LEN + 4);
        let err = base64_to_int16(&payload).unwrap_err();
        assert!(matches!(err, PulseError::PayloadTooLarge { .. }));
        assert!(err.to_string().contains("size"), "{err}");
    }

    #[test]
    fn rejects_empty_payload() {
        assert!(matches!(base64_to_int16(""), Err(PulseError::EmptyPayload)));
    }

    #[test]
    fn rejects_bad_padding_length() {
        let err = base64_to_int16("AQD").unwrap_err();
        assert!(err.to_string().contains("Invalid base64"), "{err}");
    }

    #[test]
    fn odd_byte_length_is_truncated_not_rejected() {
        // Three bytes: [0x01, 0x00, 0x7f]
        let payload = BASE64.encode([0x01u8, 0x00, 0x7f]);
        assert_eq!(base64_to_int16(&payload).unwrap(), vec![1]);
    }
}
