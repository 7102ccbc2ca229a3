use crate::audio::{ChunkQueue, PushOutcome, QUEUE_MAX_CHUNKS};
use crate::pipeline::assist::{queue_stream, AssistPipeline, EventCallback};
use crate::pipeline::events::PipelineRun;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Factor applied to the restart delay after an error that won't go away
/// on its own (bad token, bad config)
const PERSISTENT_ERROR_BACKOFF: u32 = 10;

/// Settings for a [`PipelineManager`]
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    /// Pipeline to run; `None` selects the default assist pipeline
    pub pipeline_id: Option<String>,
    /// Queue capacity in chunks
    pub queue_max_chunks: usize,
    /// Pause before restarting after a failed run
    pub restart_delay: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            pipeline_id: None,
            queue_max_chunks: QUEUE_MAX_CHUNKS,
            restart_delay: Duration::from_secs(1),
        }
    }
}

/// Keeps an assist pipeline running on a satellite's audio
pub struct PipelineManager {
    satellite_id: String,
    pipeline: Arc<dyn AssistPipeline>,
    queue: Arc<ChunkQueue>,
    settings: PipelineSettings,
    on_event: EventCallback,
    shutdown_tx: watch::Sender<bool>,
    runs_started: AtomicU64,
    queue_flushes: AtomicU64,
}

impl PipelineManager {
    pub fn new(
        satellite_id: impl Into<String>,
        pipeline: Arc<dyn AssistPipeline>,
        settings: PipelineSettings,
        on_event: EventCallback,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            satellite_id: satellite_id.into(),
            pipeline,
            queue: Arc::new(ChunkQueue::new(settings.queue_max_chunks)),
            settings,
            on_event,
            shutdown_tx,
            runs_started: AtomicU64::new(0),
            queue_flushes: AtomicU64::new(0),
        }
    }

    /// Enqueue an audio chunk, or clear the queue if it's full
    pub fn enqueue_chunk(&self, chunk: Vec<u8>) -> PushOutcome {
        let outcome = self.queue.push(chunk);
        if matches!(outcome, PushOutcome::Flushed { .. }) {
            self.queue_flushes.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    /// Number of chunks waiting for the pipeline
    pub fn queued_chunks(&self) -> usize {
        self.queue.len()
    }

    pub fn runs_started(&self) -> u64 {
        self.runs_started.load(Ordering::Relaxed)
    }

    pub fn queue_flushes(&self) -> u64 {
        self.queue_flushes.load(Ordering::Relaxed)
    }

    /// Run the managed pipeline until [`close`](Self::close) is called
    pub async fn run(&self) {
        debug!("Starting pipeline manager for {}", self.satellite_id);
        let mut shutdown = self.shutdown_tx.subscribe();

        while !*shutdown.borrow() {
            let run = PipelineRun::full(&self.satellite_id, self.settings.pipeline_id.clone());
            let audio = queue_stream(Arc::clone(&self.queue));
            let run_number = self.runs_started.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("Starting pipeline run {} for {}", run_number, self.satellite_id);

            let result = tokio::select! {
                result = self.pipeline.run(run, audio, Arc::clone(&self.on_event)) => result,
                _ = shutdown.wait_for(|closed| *closed) => break,
            };

            let delay = match result {
                Ok(()) => {
                    debug!("Pipeline finished, starting over");
                    continue;
                }
                Err(e) if e.is_recoverable() => {
                    error!("Pipeline run failed for {}: {}", self.satellite_id, e);
                    self.settings.restart_delay
                }
                Err(e) => {
                    error!(
                        "Pipeline run failed for {}: {} ({})",
                        self.satellite_id,
                        e,
                        e.user_message()
                    );
                    self.settings.restart_delay * PERSISTENT_ERROR_BACKOFF
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.wait_for(|closed| *closed) => break,
            }
        }

        info!("Pipeline manager for {} stopped", self.satellite_id);
    }

    /// Stop the pipeline, interrupting a run in progress
    pub fn close(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}
