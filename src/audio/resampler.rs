use crate::{HassMicError, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

/// Frames fed to the sinc resampler per call
const CHUNK_FRAMES: usize = 1024;

/// Streaming mono resampler
///
/// Satellites send audio in small chunks that rarely line up with the
/// resampler's fixed input size, so leftover frames are carried over to the
/// next call instead of being zero padded.
pub struct StreamResampler {
    resampler: SincFixedIn<f32>,
    pending: Vec<f32>,
    input_rate: u32,
    output_rate: u32,
}

impl StreamResampler {
    /// Create a new mono resampler from `input_rate` to `output_rate`
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 {
            return Err(HassMicError::ConfigError(
                "Sample rates must be greater than 0".into(),
            ));
        }

        let resample_ratio = output_rate as f64 / input_rate as f64;

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let resampler = SincFixedIn::<f32>::new(resample_ratio, 2.0, params, CHUNK_FRAMES, 1)
            .map_err(|e| {
                HassMicError::AudioProcessingError(format!("Failed to create resampler: {}", e))
            })?;

        debug!("Created resampler: {} Hz -> {} Hz", input_rate, output_rate);

        Ok(Self {
            resampler,
            pending: Vec::with_capacity(CHUNK_FRAMES * 2),
            input_rate,
            output_rate,
        })
    }

    /// Feed mono samples, returning whatever output is ready
    pub fn push(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(input);

        let mut output = Vec::new();
        loop {
            let needed = self.resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }

            let processed = self
                .resampler
                .process(&[&self.pending[..needed]], None)
                .map_err(|e| {
                    HassMicError::AudioProcessingError(format!("Resampling failed: {}", e))
                })?;

            output.extend_from_slice(&processed[0]);
            self.pending.drain(..needed);
        }

        Ok(output)
    }

    /// Frames waiting for a full resampler chunk
    pub fn pending_frames(&self) -> usize {
        self.pending.len()
    }

    /// Get the input sample rate
    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    /// Get the output sample rate
    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Reset the resampler state
    pub fn reset(&mut self) {
        self.resampler.reset();
        self.pending.clear();
    }
}
