//! PCM16 codec and WAV framing for speech in and out of the AI provider.

use std::io::Cursor;

use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sample rate of microphone audio sent to the live model.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of audio produced by the speech and live models.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("invalid base64 audio: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("WAV encoding failed: {0}")]
    Wav(#[from] hound::Error),
    #[error("PCM16 payload has odd length {0}")]
    OddLength(usize),
    #[error("audio clip is empty")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Mp3,
}

impl AudioFormat {
    pub const fn as_str(self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
        }
    }
}

/// A recorded learner utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub data: Vec<u8>,
    pub format: AudioFormat,
}

impl AudioClip {
    pub fn from_base64(encoded: &str, format: AudioFormat) -> Result<Self, AudioError> {
        let data = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
        if data.is_empty() {
            return Err(AudioError::Empty);
        }
        Ok(Self { data, format })
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }
}

/// Converts float samples in [-1, 1] to little-endian PCM16 bytes.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let scaled = if clamped < 0.0 {
            clamped * 32768.0
        } else {
            clamped * 32767.0
        };
        out.extend_from_slice(&(scaled as i16).to_le_bytes());
    }
    out
}

/// Converts little-endian PCM16 bytes to float samples in [-1, 1].
pub fn decode_pcm16(bytes: &[u8]) -> Result<Vec<f32>, AudioError> {
    if bytes.len() % 2 != 0 {
        return Err(AudioError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect())
}

/// Playback length in seconds of mono PCM16 at `sample_rate`.
pub fn pcm16_duration_secs(byte_len: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    (byte_len / 2) as f64 / f64::from(sample_rate)
}

/// Wraps raw mono PCM16 in a WAV container.
pub fn pcm16_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>, AudioError> {
    if pcm.len() % 2 != 0 {
        return Err(AudioError::OddLength(pcm.len()));
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for pair in pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}
