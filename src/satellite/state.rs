//! Session state for one satellite
//!
//! The satellite core writes it from connection and pipeline callbacks;
//! everything else reads snapshots.

use crate::pipeline::{PipelineEvent, PipelineEventType};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Where the current pipeline run is
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PipelinePhase {
    /// Between runs, or not running
    #[default]
    Idle,
    /// Listening for the wake word
    WakeWord,
    /// Transcribing a command
    Stt,
    /// Handling the recognized intent
    Intent,
    /// Synthesizing the response
    Tts,
    /// Response handed to the satellite for playback
    Playback,
}

impl PipelinePhase {
    pub fn is_idle(&self) -> bool {
        matches!(self, PipelinePhase::Idle)
    }

    /// Phase a pipeline event moves to, if it moves at all
    pub fn after(event_type: &PipelineEventType) -> Option<Self> {
        match event_type {
            PipelineEventType::RunStart | PipelineEventType::WakeWordStart => {
                Some(PipelinePhase::WakeWord)
            }
            PipelineEventType::SttStart => Some(PipelinePhase::Stt),
            PipelineEventType::IntentStart => Some(PipelinePhase::Intent),
            PipelineEventType::TtsStart => Some(PipelinePhase::Tts),
            PipelineEventType::TtsEnd => Some(PipelinePhase::Playback),
            PipelineEventType::RunEnd | PipelineEventType::Error => Some(PipelinePhase::Idle),
            _ => None,
        }
    }
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelinePhase::Idle => write!(f, "Idle"),
            PipelinePhase::WakeWord => write!(f, "Wake word"),
            PipelinePhase::Stt => write!(f, "STT"),
            PipelinePhase::Intent => write!(f, "Intent"),
            PipelinePhase::Tts => write!(f, "TTS"),
            PipelinePhase::Playback => write!(f, "Playback"),
        }
    }
}

/// What the satellite told us about itself in `client-info`
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClientInfo {
    pub uuid: Option<String>,
    pub data: Map<String, Value>,
}

impl ClientInfo {
    pub fn from_data(data: Map<String, Value>) -> Self {
        Self {
            uuid: data.get("uuid").and_then(Value::as_str).map(str::to_string),
            data,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SessionState {
    pub connection: ConnectionState,
    pub phase: PipelinePhase,
    pub client_info: Option<ClientInfo>,
    /// Last error reported by the pipeline
    pub last_error: Option<String>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub audio_chunks: u64,
    pub queue_flushes: u64,
    pub connects: u64,
    pub completed_runs: u64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connection: self.connection,
            phase: self.phase,
            client_info: self.client_info.clone(),
            last_error: self.last_error.clone(),
            last_event_at: self.last_event_at,
            audio_chunks: self.audio_chunks,
            queue_flushes: self.queue_flushes,
            connects: self.connects,
            completed_runs: self.completed_runs,
        }
    }

    // === State transitions ===

    pub fn set_connected(&mut self, connected: bool) {
        if connected {
            self.connection = ConnectionState::Connected;
            self.connects += 1;
        } else {
            self.connection = ConnectionState::Disconnected;
            self.phase = PipelinePhase::Idle;
        }
    }

    pub fn apply_event(&mut self, event: &PipelineEvent) {
        self.last_event_at = Some(event.timestamp);

        match event.event_type {
            PipelineEventType::RunStart => self.last_error = None,
            PipelineEventType::RunEnd => self.completed_runs += 1,
            PipelineEventType::Error => {
                self.last_error = Some(
                    event
                        .error_message()
                        .unwrap_or_else(|| "unknown pipeline error".to_string()),
                );
            }
            _ => {}
        }

        if let Some(phase) = PipelinePhase::after(&event.event_type) {
            self.phase = phase;
        }
    }

    pub fn record_chunk(&mut self) {
        self.audio_chunks += 1;
    }

    pub fn record_flush(&mut self) {
        self.queue_flushes += 1;
    }
}

/// Immutable copy of a [`SessionState`]
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub phase: PipelinePhase,
    pub client_info: Option<ClientInfo>,
    pub last_error: Option<String>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub audio_chunks: u64,
    pub queue_flushes: u64,
    pub connects: u64,
    pub completed_runs: u64,
}

/// Thread-safe shared session state
#[derive(Clone, Default)]
pub struct SharedSessionState {
    inner: Arc<RwLock<SessionState>>,
}

impl SharedSessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, SessionState> {
        self.inner.read()
    }

    pub fn write(&self) -> parking_lot::RwLockWriteGuard<'_, SessionState> {
        self.inner.write()
    }

    /// Snapshot of the current state (no lock held after return)
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.read().snapshot()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.read().connection.is_connected()
    }

    pub fn phase(&self) -> PipelinePhase {
        self.inner.read().phase
    }

    pub fn device_uuid(&self) -> Option<String> {
        self.inner.read().client_info.as_ref().and_then(|c| c.uuid.clone())
    }
}
