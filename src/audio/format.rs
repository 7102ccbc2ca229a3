//! PCM sample formats reported by satellites

use crate::{HassMicError, Result};
use serde_json::{Map, Value};
use std::fmt;

/// Sample rate expected by the assist pipeline
pub const PIPELINE_SAMPLE_RATE: u32 = 16000;
/// Sample width (bytes) expected by the assist pipeline
pub const PIPELINE_SAMPLE_WIDTH: u16 = 2;
/// Channel count expected by the assist pipeline
pub const PIPELINE_CHANNELS: u16 = 1;

/// Format of the PCM payload in an audio chunk
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub rate: u32,
    /// Bytes per sample
    pub width: u16,
    /// Interleaved channel count
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pipeline()
    }
}

impl AudioFormat {
    pub fn new(rate: u32, width: u16, channels: u16) -> Self {
        Self {
            rate,
            width,
            channels,
        }
    }

    /// The format the assist pipeline consumes
    pub fn pipeline() -> Self {
        Self::new(PIPELINE_SAMPLE_RATE, PIPELINE_SAMPLE_WIDTH, PIPELINE_CHANNELS)
    }

    /// Read `rate`, `width` and `channels` from an audio chunk's data,
    /// falling back to the pipeline format for anything missing
    pub fn from_chunk_data(data: &Map<String, Value>) -> Self {
        let default = Self::pipeline();
        let field = |key: &str| data.get(key).and_then(Value::as_u64);

        Self {
            // Out of range values become 0 so validation rejects them
            rate: field("rate")
                .map(|v| u32::try_from(v).unwrap_or(0))
                .unwrap_or(default.rate),
            width: field("width")
                .map(|v| u16::try_from(v).unwrap_or(0))
                .unwrap_or(default.width),
            channels: field("channels")
                .map(|v| u16::try_from(v).unwrap_or(0))
                .unwrap_or(default.channels),
        }
    }

    pub fn is_pipeline_format(&self) -> bool {
        *self == Self::pipeline()
    }

    /// Bytes per interleaved frame
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.channels as usize
    }

    /// Check that this format can be decoded
    pub fn validate(&self) -> Result<()> {
        if self.rate == 0 {
            return Err(HassMicError::AudioProcessingError(
                "Sample rate must be greater than 0".into(),
            ));
        }
        if self.channels == 0 {
            return Err(HassMicError::AudioProcessingError(
                "Number of channels must be greater than 0".into(),
            ));
        }
        if !matches!(self.width, 1 | 2 | 4) {
            return Err(HassMicError::AudioProcessingError(format!(
                "Unsupported sample width: {} bytes",
                self.width
            )));
        }
        Ok(())
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {}-bit, {} ch",
            self.rate,
            self.width * 8,
            self.channels
        )
    }
}

/// Decode little-endian PCM into f32 samples in -1.0..=1.0
///
/// Trailing bytes that don't form a whole sample are ignored.
pub fn decode_pcm(bytes: &[u8], width: u16) -> Result<Vec<f32>> {
    let samples = match width {
        1 => bytes
            .iter()
            .map(|&b| (b as f32 - 128.0) / 128.0)
            .collect(),
        2 => bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / i16::MAX as f32)
            .collect(),
        4 => bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32 / i32::MAX as f32)
            .collect(),
        _ => {
            return Err(HassMicError::AudioProcessingError(format!(
                "Unsupported sample width: {} bytes",
                width
            )))
        }
    };
    Ok(samples)
}

/// Encode f32 samples as signed 16-bit little-endian PCM
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Downmix interleaved audio to mono by averaging channels
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
