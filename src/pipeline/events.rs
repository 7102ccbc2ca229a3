//! Assist pipeline event model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Stages of the assist pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    WakeWord,
    Stt,
    Intent,
    Tts,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::WakeWord => "wake_word",
            PipelineStage::Stt => "stt",
            PipelineStage::Intent => "intent",
            PipelineStage::Tts => "tts",
        }
    }
}

/// Event types emitted during a pipeline run
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PipelineEventType {
    RunStart,
    RunEnd,
    WakeWordStart,
    WakeWordEnd,
    SttStart,
    SttVadStart,
    SttVadEnd,
    SttEnd,
    IntentStart,
    IntentEnd,
    TtsStart,
    TtsEnd,
    Error,
    Unknown(String),
}

impl PipelineEventType {
    pub fn parse(s: &str) -> Self {
        match s {
            "run-start" => PipelineEventType::RunStart,
            "run-end" => PipelineEventType::RunEnd,
            "wake_word-start" => PipelineEventType::WakeWordStart,
            "wake_word-end" => PipelineEventType::WakeWordEnd,
            "stt-start" => PipelineEventType::SttStart,
            "stt-vad-start" => PipelineEventType::SttVadStart,
            "stt-vad-end" => PipelineEventType::SttVadEnd,
            "stt-end" => PipelineEventType::SttEnd,
            "intent-start" => PipelineEventType::IntentStart,
            "intent-end" => PipelineEventType::IntentEnd,
            "tts-start" => PipelineEventType::TtsStart,
            "tts-end" => PipelineEventType::TtsEnd,
            "error" => PipelineEventType::Error,
            other => PipelineEventType::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PipelineEventType::RunStart => "run-start",
            PipelineEventType::RunEnd => "run-end",
            PipelineEventType::WakeWordStart => "wake_word-start",
            PipelineEventType::WakeWordEnd => "wake_word-end",
            PipelineEventType::SttStart => "stt-start",
            PipelineEventType::SttVadStart => "stt-vad-start",
            PipelineEventType::SttVadEnd => "stt-vad-end",
            PipelineEventType::SttEnd => "stt-end",
            PipelineEventType::IntentStart => "intent-start",
            PipelineEventType::IntentEnd => "intent-end",
            PipelineEventType::TtsStart => "tts-start",
            PipelineEventType::TtsEnd => "tts-end",
            PipelineEventType::Error => "error",
            PipelineEventType::Unknown(s) => s,
        }
    }
}

impl fmt::Display for PipelineEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single event from a pipeline run
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineEvent {
    pub event_type: PipelineEventType,
    pub data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl PipelineEvent {
    pub fn new(event_type: PipelineEventType, data: Map<String, Value>) -> Self {
        Self {
            event_type,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Build an event from the `{"type", "data", "timestamp"}` object
    /// Home Assistant sends
    pub fn from_json(value: &Value) -> Option<Self> {
        let event_type = PipelineEventType::parse(value.get("type")?.as_str()?);
        let data = match value.get("data") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        let timestamp = value
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);

        Some(Self {
            event_type,
            data,
            timestamp,
        })
    }

    /// Look up a nested value by path, e.g. `["tts_output", "url"]`
    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.data.get(*first)?;
        for key in rest {
            current = current.get(*key)?;
        }
        Some(current)
    }

    pub fn get_str(&self, path: &[&str]) -> Option<&str> {
        self.get_path(path).and_then(Value::as_str)
    }

    /// URL of the synthesized response, on `tts-end`
    pub fn tts_url(&self) -> Option<&str> {
        self.get_str(&["tts_output", "url"])
    }

    /// Detected wake word, on `wake_word-end`
    pub fn wake_word(&self) -> Option<&str> {
        self.get_str(&["wake_word_output", "wake_word_phrase"])
            .or_else(|| self.get_str(&["wake_word_output", "wake_word_id"]))
    }

    /// Transcript, on `stt-end`
    pub fn stt_text(&self) -> Option<&str> {
        self.get_str(&["stt_output", "text"])
    }

    /// Spoken response, on `intent-end`
    pub fn intent_speech(&self) -> Option<&str> {
        self.get_str(&["intent_output", "response", "speech", "plain", "speech"])
    }

    /// Error description, on `error`
    pub fn error_message(&self) -> Option<String> {
        let code = self.data.get("code").and_then(Value::as_str);
        let message = self.data.get("message").and_then(Value::as_str);
        match (code, message) {
            (Some(code), Some(message)) => Some(format!("{}: {}", code, message)),
            (None, Some(message)) => Some(message.to_string()),
            (Some(code), None) => Some(code.to_string()),
            (None, None) => None,
        }
    }
}

// Home Assistant timestamps are ISO 8601, with or without an offset
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormats {
    Wav,
    Ogg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodecs {
    Pcm,
    Opus,
}

/// Description of the audio stream handed to the pipeline
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechMetadata {
    pub language: String,
    pub format: AudioFormats,
    pub codec: AudioCodecs,
    pub bit_rate: u16,
    pub sample_rate: u32,
    pub channel: u16,
}

impl Default for SpeechMetadata {
    fn default() -> Self {
        Self {
            language: String::new(),
            format: AudioFormats::Wav,
            codec: AudioCodecs::Pcm,
            bit_rate: 16,
            sample_rate: crate::audio::format::PIPELINE_SAMPLE_RATE,
            channel: crate::audio::format::PIPELINE_CHANNELS,
        }
    }
}

/// Parameters for one pipeline invocation
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineRun {
    pub start_stage: PipelineStage,
    pub end_stage: PipelineStage,
    pub metadata: SpeechMetadata,
    /// Pipeline to run; `None` selects the default assist pipeline
    pub pipeline_id: Option<String>,
    /// Config entry the audio comes from
    pub satellite_id: String,
}

impl PipelineRun {
    /// A full wake word to TTS run
    pub fn full(satellite_id: impl Into<String>, pipeline_id: Option<String>) -> Self {
        Self {
            start_stage: PipelineStage::WakeWord,
            end_stage: PipelineStage::Tts,
            metadata: SpeechMetadata::default(),
            pipeline_id,
            satellite_id: satellite_id.into(),
        }
    }
}
