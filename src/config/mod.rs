//! Configuration for the bridge
//!
//! One TOML file holds the Home Assistant connection, tuning for the
//! satellite connections and the pipeline, and the configured entries.

pub mod discovery;
pub mod entry;
pub mod flow;

pub use discovery::{ZeroconfServiceInfo, SERVICE_TYPE};
pub use entry::{ConfigEntry, EntryData, EntryRegistry, DEFAULT_PORT};
pub use flow::{validate_connection_params, ConfigFlow, FlowResult, VALIDATION_TIMEOUT};

use crate::pipeline::PipelineSettings;
use crate::satellite::SatelliteSettings;
use crate::{HassMicError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Environment variable consulted when no token is configured
pub const TOKEN_ENV_VAR: &str = "HASSMIC_TOKEN";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeAssistantSettings {
    /// Websocket API endpoint
    pub url: String,
    /// Long-lived access token
    pub token: String,
    pub internal_url: String,
    pub external_url: String,
    /// Empty selects the default pipeline
    pub pipeline_id: String,
}

impl Default for HomeAssistantSettings {
    fn default() -> Self {
        Self {
            url: "ws://homeassistant.local:8123/api/websocket".to_string(),
            token: String::new(),
            internal_url: "http://homeassistant.local:8123".to_string(),
            external_url: String::new(),
            pipeline_id: String::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub timeout_secs: u64,
    pub reconnect_delay_secs: u64,
    pub max_consecutive_bad_messages: u32,
    pub extra_data_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            reconnect_delay_secs: 2,
            max_consecutive_bad_messages: 5,
            extra_data_timeout_ms: 500,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue_max_chunks: usize,
    pub restart_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_max_chunks: crate::audio::QUEUE_MAX_CHUNKS,
            restart_delay_ms: 1000,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Empty disables the WAV dump
    pub dump_dir: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub home_assistant: HomeAssistantSettings,
    pub connection: ConnectionSettings,
    pub pipeline: PipelineConfig,
    pub audio: AudioSettings,
    pub entries: Vec<ConfigEntry>,
}

impl AppConfig {
    /// `<config dir>/hassmic/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(crate::DOMAIN).join("config.toml"))
    }

    /// Load and validate a config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            HassMicError::ConfigError(format!(
                "Failed to read config '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: AppConfig = toml::from_str(&content).map_err(|e| {
            HassMicError::ConfigError(format!(
                "Failed to parse config '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file gives the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| HassMicError::ConfigError(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.websocket_url()?;

        let conn = &self.connection;
        if conn.timeout_secs == 0 {
            return Err(HassMicError::ConfigError("connection.timeout_secs must be > 0".into()));
        }
        if conn.max_consecutive_bad_messages == 0 {
            return Err(HassMicError::ConfigError(
                "connection.max_consecutive_bad_messages must be > 0".into(),
            ));
        }
        if conn.extra_data_timeout_ms == 0 {
            return Err(HassMicError::ConfigError(
                "connection.extra_data_timeout_ms must be > 0".into(),
            ));
        }
        if self.pipeline.queue_max_chunks == 0 {
            return Err(HassMicError::ConfigError(
                "pipeline.queue_max_chunks must be > 0".into(),
            ));
        }

        for entry in &self.entries {
            entry.validate()?;
        }
        Ok(())
    }

    pub fn websocket_url(&self) -> Result<Url> {
        let url = Url::parse(&self.home_assistant.url).map_err(|e| {
            HassMicError::ConfigError(format!(
                "Invalid home_assistant.url '{}': {}",
                self.home_assistant.url, e
            ))
        })?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(HassMicError::ConfigError(format!(
                "home_assistant.url must use ws or wss, not {}",
                other
            ))),
        }
    }

    /// The configured token, or the one from the environment
    pub fn token(&self) -> Option<String> {
        if !self.home_assistant.token.is_empty() {
            return Some(self.home_assistant.token.clone());
        }
        std::env::var(TOKEN_ENV_VAR).ok().filter(|t| !t.is_empty())
    }

    /// Base for relative TTS URLs: the internal URL, else the external one
    pub fn url_base(&self) -> Option<String> {
        [&self.home_assistant.internal_url, &self.home_assistant.external_url]
            .into_iter()
            .find(|u| !u.is_empty())
            .cloned()
    }

    pub fn pipeline_id(&self) -> Option<String> {
        Some(self.home_assistant.pipeline_id.clone()).filter(|id| !id.is_empty())
    }

    pub fn satellite_settings(&self) -> SatelliteSettings {
        SatelliteSettings {
            timeout: Duration::from_secs(self.connection.timeout_secs),
            reconnect_delay: Duration::from_secs(self.connection.reconnect_delay_secs),
            max_consecutive_bad_messages: self.connection.max_consecutive_bad_messages,
            extra_data_timeout: Duration::from_millis(self.connection.extra_data_timeout_ms),
            pipeline: PipelineSettings {
                pipeline_id: self.pipeline_id(),
                queue_max_chunks: self.pipeline.queue_max_chunks,
                restart_delay: Duration::from_millis(self.pipeline.restart_delay_ms),
            },
            url_base: self.url_base(),
            dump_dir: Some(&self.audio.dump_dir)
                .filter(|d| !d.is_empty())
                .map(PathBuf::from),
            ..SatelliteSettings::default()
        }
    }
}
