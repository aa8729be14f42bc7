//! PCM <-> wire conversions for the live link.
//!
//! Outbound: f32 samples → clamped 16-bit little-endian PCM → base64, tagged
//! `audio/pcm;rate=N`. Inbound: base64 → 16-bit LE PCM → f32 in -1.0..1.0.

use crate::error::{LiveError, LiveResult};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Base64 payload with its MIME type, as carried in realtime input and inline model audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub mime_type: String,
    pub data: String,
}

/// Decoded inbound audio, interleaved when `channels > 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    /// Frames per channel.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Playback length in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Encode f32 samples to 16-bit little-endian PCM.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode 16-bit little-endian PCM to f32. A trailing odd byte is ignored.
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
        .collect()
}

/// One captured frame as an outbound media blob.
pub fn encode_frame(samples: &[f32], sample_rate: u32) -> MediaBlob {
    MediaBlob {
        mime_type: pcm_mime_type(sample_rate),
        data: B64.encode(encode_pcm16(samples)),
    }
}

pub fn decode_base64(data: &str) -> LiveResult<Vec<u8>> {
    B64.decode(data.trim())
        .map_err(|e| LiveError::Codec(format!("invalid base64 audio: {}", e)))
}

/// Decode a base64 PCM payload at a fixed rate and channel count.
pub fn decode_audio(data: &str, sample_rate: u32, channels: u16) -> LiveResult<DecodedAudio> {
    if channels == 0 {
        return Err(LiveError::Codec("channel count must be non-zero".to_string()));
    }
    let bytes = decode_base64(data)?;
    let mut samples = decode_pcm16(&bytes);
    // Drop a partial trailing frame so every channel has the same length.
    let whole = samples.len() - samples.len() % channels as usize;
    samples.truncate(whole);
    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

/// Average interleaved channels down to mono.
pub fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|c| c.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Nearest-sample resampling of mono audio.
pub fn resample(mono: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || mono.is_empty() {
        return mono.to_vec();
    }
    let out_len = (mono.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_idx = (i as f64 * from_rate as f64 / to_rate as f64) as usize;
        if src_idx >= mono.len() {
            break;
        }
        out.push(mono[src_idx]);
    }
    out
}
