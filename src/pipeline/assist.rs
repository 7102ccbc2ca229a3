use crate::audio::ChunkQueue;
use crate::pipeline::events::{PipelineEvent, PipelineRun};
use crate::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;

/// Audio handed to a pipeline run: 16 kHz mono 16-bit PCM chunks
pub type AudioStream = BoxStream<'static, Vec<u8>>;

/// Receives every event of a run as it happens
pub type EventCallback = Arc<dyn Fn(PipelineEvent) + Send + Sync>;

/// An assist pipeline the bridge can feed audio into
#[async_trait]
pub trait AssistPipeline: Send + Sync {
    /// Run the pipeline once, returning when the run has ended
    async fn run(&self, run: PipelineRun, audio: AudioStream, on_event: EventCallback)
        -> Result<()>;
}

/// Endless stream of chunks taken from `queue`
pub fn queue_stream(queue: Arc<ChunkQueue>) -> AudioStream {
    async_stream::stream! {
        loop {
            yield queue.pop().await;
        }
    }
    .boxed()
}
