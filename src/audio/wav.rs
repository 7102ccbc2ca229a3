use crate::audio::format::{PIPELINE_CHANNELS, PIPELINE_SAMPLE_RATE};
use crate::{HassMicError, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Records the normalized pipeline stream of one satellite to a WAV file
pub struct AudioRecorder {
    writer: Option<WavWriter<BufWriter<File>>>,
    path: PathBuf,
    samples_written: u64,
}

impl AudioRecorder {
    /// Create `path` as a 16 kHz mono 16-bit WAV file
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let spec = WavSpec {
            channels: PIPELINE_CHANNELS,
            sample_rate: PIPELINE_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let writer = WavWriter::create(path.as_ref(), spec)
            .map_err(|e| HassMicError::IOError(format!("Failed to create WAV writer: {}", e)))?;

        debug!("Recording pipeline audio to {:?}", path.as_ref());

        Ok(Self {
            writer: Some(writer),
            path: path.as_ref().to_path_buf(),
            samples_written: 0,
        })
    }

    /// Append signed 16-bit little-endian PCM
    pub fn write_pcm16(&mut self, pcm: &[u8]) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(HassMicError::IOError("WAV file already finalized".into()));
        };

        for pair in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                .map_err(|e| HassMicError::IOError(format!("Failed to write sample: {}", e)))?;
            self.samples_written += 1;
        }
        Ok(())
    }

    /// Number of samples written so far
    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the WAV header and close the file
    pub fn finalize(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().map_err(|e| {
                HassMicError::IOError(format!("Failed to finalize WAV file: {}", e))
            })?;
            info!(
                "Wrote {} samples to WAV file: {:?}",
                self.samples_written, self.path
            );
        }
        Ok(())
    }
}

impl Drop for AudioRecorder {
    fn drop(&mut self) {
        let _ = self.finalize();
    }
}

/// Read a 16-bit WAV file back as (samples, sample_rate, channels)
pub fn read_wav_pcm16<P: AsRef<Path>>(path: P) -> Result<(Vec<i16>, u32, u16)> {
    let mut reader = WavReader::open(path.as_ref())
        .map_err(|e| HassMicError::IOError(format!("Failed to open WAV file: {}", e)))?;

    let spec = reader.spec();
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(HassMicError::AudioProcessingError(format!(
            "Unsupported WAV format: {} bits, {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }

    let samples = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| HassMicError::IOError(format!("Failed to read sample: {}", e)))?;

    Ok((samples, spec.sample_rate, spec.channels))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dump.wav");

        let mut recorder = AudioRecorder::create(&path).unwrap();
        let pcm: Vec<u8> = [0i16, 1000, -1000, i16::MAX]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        recorder.write_pcm16(&pcm).unwrap();
        assert_eq!(recorder.samples_written(), 4);
        recorder.finalize().unwrap();

        let (samples, rate, channels) = read_wav_pcm16(&path).unwrap();
        assert_eq!(rate, 16000);
        assert_eq!(channels, 1);
        assert_eq!(samples, vec![0, 1000, -1000, i16::MAX]);
    }

    #[test]
    fn test_write_after_finalize_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = AudioRecorder::create(dir.path().join("a.wav")).unwrap();
        recorder.finalize().unwrap();
        assert!(recorder.write_pcm16(&[0, 0]).is_err());
    }
}
