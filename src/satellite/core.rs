use crate::audio::{AudioFormat, AudioNormalizer, AudioRecorder, PushOutcome};
use crate::config::ConfigEntry;
use crate::connection::{
    ConnectionConfig, ConnectionHandler, ConnectionManager, Outbox, DEFAULT_RECONNECT_DELAY,
    DEFAULT_TIMEOUT, MAX_CONSECUTIVE_BAD_MESSAGES,
};
use crate::pipeline::{
    AssistPipeline, EventCallback, PipelineEvent, PipelineEventType, PipelineManager,
    PipelineSettings,
};
use crate::protocol::{Message, MessageType, OutgoingMessage, DEFAULT_EXTRA_DATA_TIMEOUT};
use crate::satellite::sensor::{SensorEntity, SensorSet};
use crate::satellite::state::{ClientInfo, SessionSnapshot, SharedSessionState};
use crate::Result;
use async_trait::async_trait;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// How long [`Satellite::stop`] waits for each background task
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-satellite settings shared by every entry
#[derive(Clone, Debug)]
pub struct SatelliteSettings {
    pub timeout: Duration,
    pub reconnect_delay: Duration,
    pub max_consecutive_bad_messages: u32,
    pub extra_data_timeout: Duration,
    pub pipeline: PipelineSettings,
    /// Prefix for relative TTS URLs
    pub url_base: Option<String>,
    /// Directory for WAV dumps of the normalized audio
    pub dump_dir: Option<PathBuf>,
    /// Capacity of the event channel
    pub event_capacity: usize,
}

impl Default for SatelliteSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_consecutive_bad_messages: MAX_CONSECUTIVE_BAD_MESSAGES,
            extra_data_timeout: DEFAULT_EXTRA_DATA_TIMEOUT,
            pipeline: PipelineSettings::default(),
            url_base: None,
            dump_dir: None,
            event_capacity: 256,
        }
    }
}

impl SatelliteSettings {
    pub fn connection_config(&self, entry: &ConfigEntry) -> ConnectionConfig {
        ConnectionConfig {
            timeout: self.timeout,
            reconnect_delay: self.reconnect_delay,
            max_consecutive_bad_messages: self.max_consecutive_bad_messages,
            extra_data_timeout: self.extra_data_timeout,
            ..ConnectionConfig::new(entry.data.hostname.clone(), entry.data.port)
        }
    }
}

/// Things that happen on a satellite, for whoever embeds the bridge
#[derive(Clone, Debug)]
pub enum SatelliteEvent {
    ConnectionChanged { entry_id: Uuid, connected: bool },
    Pipeline { entry_id: Uuid, event: PipelineEvent },
    SensorUpdated { entry_id: Uuid, sensor: SensorEntity },
    PlaybackRequested { entry_id: Uuid, url: String },
}

/// Resolve the URL the satellite should fetch a TTS response from
///
/// Absolute URLs are kept; relative ones need a base.
pub fn tts_playback_url(path: Option<&str>, url_base: Option<&str>) -> Option<String> {
    let path = path.filter(|p| !p.is_empty())?;
    if Url::parse(path).is_ok() {
        return Some(path.to_string());
    }
    let base = url_base.filter(|b| !b.is_empty())?;
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        Some(format!("{}{}", base, path))
    } else {
        Some(format!("{}/{}", base, path))
    }
}

// Message dispatch and pipeline event handling, shared with the background tasks
struct SatelliteCore {
    entry: ConfigEntry,
    url_base: Option<String>,
    outbox: Outbox,
    pipeline: PipelineManager,
    normalizer: Mutex<AudioNormalizer>,
    recorder: Mutex<Option<AudioRecorder>>,
    state: SharedSessionState,
    sensors: Mutex<SensorSet>,
    events: Sender<SatelliteEvent>,
}

impl SatelliteCore {
    fn handle_audio(&self, message: Message) {
        self.state.write().record_chunk();

        let format = AudioFormat::from_chunk_data(&message.data);
        let pcm = match self.normalizer.lock().process(&message.payload, format) {
            Ok(pcm) => pcm,
            Err(e) => {
                warn!("Dropping audio chunk from {}: {}", self.entry.addr(), e);
                return;
            }
        };
        // The resampler may hold everything back until it has a full block
        if pcm.is_empty() {
            return;
        }

        if let Some(recorder) = self.recorder.lock().as_mut() {
            if let Err(e) = recorder.write_pcm16(&pcm) {
                warn!("Failed to write audio dump: {}", e);
            }
        }

        if let PushOutcome::Flushed { .. } = self.pipeline.enqueue_chunk(pcm) {
            self.state.write().record_flush();
        }
    }

    fn handle_pipeline_event(&self, event: PipelineEvent) {
        debug!("Got pipeline event: {} {:?}", event.event_type, event.data);

        if event.event_type == PipelineEventType::TtsEnd {
            let path = event.tts_url();
            match tts_playback_url(path, self.url_base.as_deref()) {
                Some(url) => {
                    debug!("Play URL: '{}'", url);
                    self.outbox.send(OutgoingMessage::play_tts(url.clone()));
                    self.publish(SatelliteEvent::PlaybackRequested {
                        entry_id: self.entry.entry_id,
                        url,
                    });
                }
                None => warn!(
                    "Can't play TTS: ({:?}) or URL Base ({:?}) not found",
                    path, self.url_base
                ),
            }
        }

        self.state.write().apply_event(&event);

        let changed = self.sensors.lock().handle_pipeline_event(&event);
        self.publish_sensors(changed);

        self.publish(SatelliteEvent::Pipeline {
            entry_id: self.entry.entry_id,
            event,
        });
    }

    fn publish_sensors(&self, sensors: Vec<SensorEntity>) {
        for sensor in sensors {
            self.publish(SatelliteEvent::SensorUpdated {
                entry_id: self.entry.entry_id,
                sensor,
            });
        }
    }

    fn publish(&self, event: SatelliteEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("Satellite event channel full, dropping event"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

#[async_trait]
impl ConnectionHandler for SatelliteCore {
    async fn on_message(&self, message: Message) {
        match message.message_type {
            MessageType::Unknown => warn!(
                "Got an unknown message from {}. Ignoring it.",
                self.entry.addr()
            ),
            MessageType::AudioChunk => self.handle_audio(message),
            MessageType::ClientInfo => {
                debug!("Got client info: {}", message);
                self.state.write().client_info = Some(ClientInfo::from_data(message.data));
            }
            MessageType::Ping => {}
        }
    }

    fn on_connection_state(&self, connected: bool) {
        debug!("Got connection change to state: {}", connected);
        if !connected {
            // Frames held by the resampler belong to the dropped session
            self.normalizer.lock().reset();
        }
        self.state.write().set_connected(connected);

        let changed = self.sensors.lock().handle_connection_state_change(connected);
        self.publish_sensors(changed);
        self.publish(SatelliteEvent::ConnectionChanged {
            entry_id: self.entry.entry_id,
            connected,
        });
    }
}

/// The bridge between one satellite device and the assist pipeline
pub struct Satellite {
    core: Arc<SatelliteCore>,
    connection: Arc<ConnectionManager>,
    events_rx: Receiver<SatelliteEvent>,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Satellite {
    pub fn new(
        entry: ConfigEntry,
        settings: SatelliteSettings,
        pipeline: Arc<dyn AssistPipeline>,
    ) -> Result<Self> {
        entry.validate()?;

        let recorder = match &settings.dump_dir {
            Some(dir) => {
                let file = format!(
                    "{}-{}.wav",
                    entry.entry_id,
                    chrono::Local::now().format("%Y%m%d-%H%M%S")
                );
                let recorder = AudioRecorder::create(dir.join(file))?;
                info!("Dumping audio from {} to {}", entry.title, recorder.path().display());
                Some(recorder)
            }
            None => None,
        };

        let (outbox, outbox_rx) = Outbox::channel();
        let (events_tx, events_rx) = crossbeam_channel::bounded(settings.event_capacity.max(1));
        let connection_config = settings.connection_config(&entry);

        let core = Arc::new_cyclic(|weak: &Weak<SatelliteCore>| {
            let weak = weak.clone();
            let on_event: EventCallback = Arc::new(move |event: PipelineEvent| {
                if let Some(core) = weak.upgrade() {
                    core.handle_pipeline_event(event);
                }
            });

            SatelliteCore {
                pipeline: PipelineManager::new(
                    entry.entry_id.to_string(),
                    pipeline,
                    settings.pipeline.clone(),
                    on_event,
                ),
                url_base: settings.url_base.clone(),
                outbox: outbox.clone(),
                normalizer: Mutex::new(AudioNormalizer::new()),
                recorder: Mutex::new(recorder),
                state: SharedSessionState::new(),
                sensors: Mutex::new(SensorSet::new(&entry)),
                events: events_tx,
                entry,
            }
        });

        let handler: Arc<dyn ConnectionHandler> = core.clone();
        let connection = Arc::new(ConnectionManager::new(
            connection_config,
            handler,
            outbox,
            outbox_rx,
        ));

        Ok(Self {
            core,
            connection,
            events_rx,
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the connection and pipeline tasks; only the first call does anything
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Starting satellite {} at {}", self.core.entry.title, self.core.entry.addr());

        let connection = Arc::clone(&self.connection);
        let core = Arc::clone(&self.core);
        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(async move { connection.run().await }));
        tasks.push(tokio::spawn(async move { core.pipeline.run().await }));
    }

    /// Shut down both tasks and finish any audio dump
    pub async fn stop(&self) {
        info!("Stopping satellite {}", self.core.entry.title);
        self.connection.close();
        self.core.pipeline.close();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let abort = task.abort_handle();
            match tokio::time::timeout(STOP_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Satellite task failed: {}", e),
                Err(_) => {
                    warn!("Satellite task did not stop in time, aborting it");
                    abort.abort();
                }
            }
        }

        let recorder = self.core.recorder.lock().take();
        if let Some(mut recorder) = recorder {
            if let Err(e) = recorder.finalize() {
                warn!("Failed to finish audio dump: {}", e);
            }
        }
    }

    pub fn entry(&self) -> &ConfigEntry {
        &self.core.entry
    }

    pub fn entry_id(&self) -> Uuid {
        self.core.entry.entry_id
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn state(&self) -> SharedSessionState {
        self.core.state.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.core.state.snapshot()
    }

    pub fn sensors(&self) -> Vec<SensorEntity> {
        self.core.sensors.lock().iter().cloned().collect()
    }

    /// Receiver for this satellite's events
    pub fn events(&self) -> Receiver<SatelliteEvent> {
        self.events_rx.clone()
    }

    /// Queue a message for the device
    pub fn send(&self, message: OutgoingMessage) {
        self.connection.send_enqueue(message);
    }

    pub fn pipeline_runs(&self) -> u64 {
        self.core.pipeline.runs_started()
    }

    pub fn queued_chunks(&self) -> usize {
        self.core.pipeline.queued_chunks()
    }
}
