use crate::config::ConfigEntry;
use crate::pipeline::{PipelineEvent, PipelineEventType};
use crate::DOMAIN;
use std::collections::BTreeSet;

pub const SENSOR_MIC: &str = "mic";
pub const SENSOR_WAKE: &str = "wake";
pub const SENSOR_STT: &str = "stt";
pub const SENSOR_INTENT: &str = "intent";
pub const SENSOR_TTS: &str = "tts";

/// Sensors reporting pipeline output
pub const SENSORS_ALL: [&str; 4] = [SENSOR_WAKE, SENSOR_STT, SENSOR_INTENT, SENSOR_TTS];

const FALLBACK_ICON: &str = "mdi:numeric-0";

pub fn icon_for(key: &str) -> &'static str {
    match key {
        SENSOR_MIC => "mdi:microphone",
        SENSOR_WAKE => "mdi:chat-alert-outline",
        SENSOR_STT => "mdi:ear-hearing",
        SENSOR_INTENT => "mdi:brain",
        SENSOR_TTS => "mdi:speaker-message",
        _ => FALLBACK_ICON,
    }
}

/// Device a sensor belongs to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub identifiers: BTreeSet<(String, String)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SensorEntity {
    pub key: String,
    pub unique_id: String,
    pub name: String,
    pub icon: &'static str,
    pub device_info: DeviceInfo,
    pub state: Option<String>,
}

impl SensorEntity {
    pub fn new(entry: &ConfigEntry, key: &str) -> Self {
        let entry_id = entry.entry_id.to_string();
        Self {
            key: key.to_string(),
            unique_id: format!("{}-{}", entry_id, key),
            name: format!("{} {}", entry.title, key.to_uppercase().replace('_', " ")),
            icon: icon_for(key),
            device_info: DeviceInfo {
                name: entry.title.clone(),
                identifiers: BTreeSet::from([(DOMAIN.to_string(), entry_id)]),
            },
            state: None,
        }
    }

    // Returns whether the state changed
    fn set(&mut self, state: Option<String>) -> bool {
        if self.state == state {
            return false;
        }
        self.state = state;
        true
    }
}

/// Every sensor of one satellite
#[derive(Clone, Debug)]
pub struct SensorSet {
    sensors: Vec<SensorEntity>,
}

impl SensorSet {
    pub fn new(entry: &ConfigEntry) -> Self {
        let sensors = std::iter::once(SENSOR_MIC)
            .chain(SENSORS_ALL)
            .map(|key| SensorEntity::new(entry, key))
            .collect();
        Self { sensors }
    }

    pub fn get(&self, key: &str) -> Option<&SensorEntity> {
        self.sensors.iter().find(|s| s.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensorEntity> {
        self.sensors.iter()
    }

    pub fn state(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|s| s.state.as_deref())
    }

    /// Apply a pipeline event, returning the sensors that changed
    pub fn handle_pipeline_event(&mut self, event: &PipelineEvent) -> Vec<SensorEntity> {
        let updates: Vec<(&str, Option<String>)> = match event.event_type {
            PipelineEventType::WakeWordEnd => vec![
                (SENSOR_WAKE, event.wake_word().map(str::to_string)),
                (SENSOR_STT, None),
                (SENSOR_INTENT, None),
                (SENSOR_TTS, None),
            ],
            PipelineEventType::SttEnd => vec![(SENSOR_STT, event.stt_text().map(str::to_string))],
            PipelineEventType::IntentEnd => {
                vec![(SENSOR_INTENT, event.intent_speech().map(str::to_string))]
            }
            PipelineEventType::TtsEnd => vec![(SENSOR_TTS, event.tts_url().map(str::to_string))],
            _ => Vec::new(),
        };
        self.apply(updates)
    }

    pub fn handle_connection_state_change(&mut self, connected: bool) -> Vec<SensorEntity> {
        let state = if connected { "connected" } else { "disconnected" };
        self.apply(vec![(SENSOR_MIC, Some(state.to_string()))])
    }

    fn apply(&mut self, updates: Vec<(&str, Option<String>)>) -> Vec<SensorEntity> {
        let mut changed = Vec::new();
        for (key, state) in updates {
            if let Some(sensor) = self.sensors.iter_mut().find(|s| s.key == key) {
                if sensor.set(state) {
                    changed.push(sensor.clone());
                }
            }
        }
        changed
    }
}
