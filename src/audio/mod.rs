pub mod buffer;
pub mod format;
pub mod preprocessor;
pub mod resampler;
pub mod wav;

pub use buffer::{ChunkQueue, PushOutcome, QUEUE_MAX_CHUNKS};
pub use format::AudioFormat;
pub use preprocessor::AudioNormalizer;
pub use resampler::StreamResampler;
pub use wav::AudioRecorder;
