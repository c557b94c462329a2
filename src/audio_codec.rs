//! Audio codec: base64 transport framing and int16/float32 conversion.
//!
//! Wire format is always 16 kHz mono, 16-bit signed little-endian PCM,
//! base64-encoded (spec. §6). Internally every other component works in
//! `f32` samples on the -1.0..1.0 scale.

use crate::error::CodecError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// Decode a base64-encoded little-endian PCM16 frame into raw `i16` samples.
pub fn decode_pcm16_base64(audio_data: &str) -> Result<Vec<i16>, CodecError> {
    let bytes = BASE64.decode(audio_data)?;
    if bytes.len() % 2 != 0 {
        return Err(CodecError::UnalignedSamples(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect())
}

/// Convert PCM16 samples to float32 on the -1.0..1.0 scale.
pub fn pcm16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Convert float32 samples back to PCM16, clamping to the valid range.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
        .collect()
}

/// Decode a base64 transport frame directly to float32 samples.
pub fn decode_frame_to_f32(audio_data: &str) -> Result<Vec<f32>, CodecError> {
    let pcm16 = decode_pcm16_base64(audio_data)?;
    Ok(pcm16_to_f32(&pcm16))
}

/// Base64-encode PCM16 samples back into the wire transport format.
pub fn encode_pcm16_base64(samples: &[i16]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    BASE64.encode(bytes)
}

/// Encode float32 samples as a 16-bit, 16 kHz, mono WAV byte stream.
///
/// Used by the HTTP-race backend, which speaks WAV rather than raw PCM to
/// the cloud endpoint.
pub fn encode_wav_16k_mono(samples: &[f32]) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            let pcm = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(pcm)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Read a 16 kHz mono WAV file from disk into float32 samples (used by
/// `batch_file` control requests, spec. §4.8). Resampling/upmixing is out
/// of scope (spec. §1 non-goals) — the file is expected to already be
/// 16 kHz mono.
pub fn read_wav_16k_mono(path: &str) -> std::io::Result<Vec<f32>> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let samples: Vec<i16> = reader
        .samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(pcm16_to_f32(&samples))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_round_trip_is_identity() {
        let original: Vec<i16> = vec![0, 1, -1, 32767, -32768, 12345, -9999];
        let encoded = encode_pcm16_base64(&original);
        let decoded = decode_pcm16_base64(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn pcm16_f32_round_trip_is_close() {
        let original: Vec<i16> = vec![0, 16384, -16384, 32767, -32768];
        let f32s = pcm16_to_f32(&original);
        let back = f32_to_pcm16(&f32s);
        for (a, b) in original.iter().zip(back.iter()) {
            assert!((a - b).abs() <= 1, "{a} vs {b}");
        }
    }

    #[test]
    fn unaligned_bytes_is_an_error() {
        let odd = BASE64.encode([1u8, 2, 3]);
        assert!(matches!(
            decode_pcm16_base64(&odd),
            Err(CodecError::UnalignedSamples(3))
        ));
    }

    #[test]
    fn empty_frame_decodes_to_empty() {
        let empty = BASE64.encode([] as [u8; 0]);
        let decoded = decode_frame_to_f32(&empty).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn wav_encode_produces_riff_header() {
        let samples = vec![0.0f32, 0.5, -0.5, 1.0, -1.0];
        let wav = encode_wav_16k_mono(&samples).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
    }

    #[test]
    fn wav_round_trip_through_disk_is_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.wav");
        let samples = vec![0.0f32, 0.25, -0.25, 0.5, -0.5];
        let wav = encode_wav_16k_mono(&samples).unwrap();
        std::fs::write(&path, wav).unwrap();

        let read_back = read_wav_16k_mono(path.to_str().unwrap()).unwrap();
        assert_eq!(read_back.len(), samples.len());
        for (a, b) in samples.iter().zip(read_back.iter()) {
            assert!((a - b).abs() < 0.01, "{a} vs {b}");
        }
    }
}
