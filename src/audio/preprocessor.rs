use crate::audio::format::{decode_pcm, downmix_to_mono, encode_pcm16, AudioFormat};
use crate::audio::resampler::StreamResampler;
use crate::Result;
use tracing::debug;

/// Converts satellite audio into the pipeline's 16 kHz mono 16-bit PCM
///
/// Keeps resampler state between chunks; a change in the incoming format
/// starts over with a fresh resampler.
pub struct AudioNormalizer {
    target: AudioFormat,
    current: Option<AudioFormat>,
    resampler: Option<StreamResampler>,
}

impl AudioNormalizer {
    pub fn new() -> Self {
        Self {
            target: AudioFormat::pipeline(),
            current: None,
            resampler: None,
        }
    }

    /// Normalize one chunk of PCM in `format`
    pub fn process(&mut self, payload: &[u8], format: AudioFormat) -> Result<Vec<u8>> {
        if format.is_pipeline_format() {
            if self.current != Some(format) {
                self.current = Some(format);
                self.resampler = None;
            }
            return Ok(payload.to_vec());
        }

        format.validate()?;

        if self.current != Some(format) {
            debug!("Audio format changed to {}", format);
            self.current = Some(format);
            self.resampler = if format.rate != self.target.rate {
                Some(StreamResampler::new(format.rate, self.target.rate)?)
            } else {
                None
            };
        }

        let samples = decode_pcm(payload, format.width)?;
        let mono = downmix_to_mono(&samples, format.channels);

        let resampled = match self.resampler.as_mut() {
            Some(resampler) => resampler.push(&mono)?,
            None => mono,
        };

        Ok(encode_pcm16(&resampled))
    }

    /// The most recent incoming format
    pub fn current_format(&self) -> Option<AudioFormat> {
        self.current
    }

    /// Forget all state, e.g. after a reconnect
    pub fn reset(&mut self) {
        self.current = None;
        self.resampler = None;
    }
}

impl Default for AudioNormalizer {
    fn default() -> Self {
        Self::new()
    }
}
