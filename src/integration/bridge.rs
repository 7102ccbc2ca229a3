//! Runs one satellite per config entry against a shared assist pipeline

use crate::config::{AppConfig, ConfigEntry, ConfigFlow, EntryRegistry, FlowResult, ZeroconfServiceInfo};
use crate::pipeline::{AssistPipeline, HomeAssistantPipeline};
use crate::satellite::{SatelliteEvent, Satellite};
use crate::{HassMicError, Result};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

pub struct Bridge {
    config: AppConfig,
    registry: EntryRegistry,
    pipeline: Arc<dyn AssistPipeline>,
    satellites: Mutex<HashMap<Uuid, Arc<Satellite>>>,
}

impl Bridge {
    pub fn new(config: AppConfig, pipeline: Arc<dyn AssistPipeline>) -> Self {
        let registry = EntryRegistry::from_entries(config.entries.clone());
        Self {
            config,
            registry,
            pipeline,
            satellites: Mutex::new(HashMap::new()),
        }
    }

    /// Bridge talking to the Home Assistant instance in `config`
    pub fn from_config(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let token = config.token().ok_or_else(|| {
            HassMicError::ConfigError(format!(
                "No Home Assistant token configured; set home_assistant.token or ${}",
                crate::config::TOKEN_ENV_VAR
            ))
        })?;
        let pipeline = HomeAssistantPipeline::new(config.websocket_url()?, token);
        Ok(Self::new(config, Arc::new(pipeline)))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &EntryRegistry {
        &self.registry
    }

    /// Where relative TTS URLs are resolved against
    pub fn url_base(&self) -> Option<String> {
        self.config.url_base()
    }

    /// Start the satellite for `entry`; returns false if it was already running
    pub fn setup_entry(&self, entry: ConfigEntry) -> Result<bool> {
        let mut satellites = self.satellites.lock();
        if satellites.contains_key(&entry.entry_id) {
            debug!("Entry {} is already set up", entry.entry_id);
            return Ok(false);
        }

        if self.registry.get(&entry.entry_id).is_none() {
            self.registry.add(entry.clone())?;
        }

        let entry_id = entry.entry_id;
        let satellite = Satellite::new(entry, self.config.satellite_settings(), Arc::clone(&self.pipeline))?;
        satellite.start();
        satellites.insert(entry_id, Arc::new(satellite));
        Ok(true)
    }

    /// Stop the satellite for `entry_id`; returns false if none was running
    pub async fn unload_entry(&self, entry_id: &Uuid) -> bool {
        let satellite = self.satellites.lock().remove(entry_id);
        match satellite {
            Some(satellite) => {
                satellite.stop().await;
                true
            }
            None => false,
        }
    }

    /// Restart an entry with new settings, e.g. after it moved to a new address
    pub async fn reload_entry(&self, entry: ConfigEntry) -> Result<()> {
        info!("Reloading {} at {}", entry.title, entry.addr());
        if !self.registry.update(entry.clone()) {
            self.registry.add(entry.clone())?;
        }
        self.unload_entry(&entry.entry_id).await;
        self.setup_entry(entry)?;
        Ok(())
    }

    /// Set up every configured entry, returning how many started
    pub fn start_all(&self) -> usize {
        let mut started = 0;
        for entry in self.registry.entries() {
            let title = entry.title.clone();
            match self.setup_entry(entry) {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => error!("Failed to set up {}: {}", title, e),
            }
        }
        info!("Started {} satellite(s)", started);
        started
    }

    pub async fn shutdown(&self) {
        let satellites: Vec<Arc<Satellite>> =
            self.satellites.lock().drain().map(|(_, s)| s).collect();
        info!("Shutting down {} satellite(s)", satellites.len());
        for satellite in satellites {
            satellite.stop().await;
        }
    }

    /// Feed a zeroconf record through the config flow
    ///
    /// A known device at a new address is reloaded; an unknown one needs
    /// confirmation, which the returned form asks for.
    pub async fn handle_discovery(&self, info: ZeroconfServiceInfo) -> FlowResult {
        let mut flow = ConfigFlow::new(self.registry.clone());
        let result = flow.step_zeroconf(info);
        if let FlowResult::Abort {
            entry: Some(entry),
            reload: true,
            ..
        } = &result
        {
            if let Err(e) = self.reload_entry(entry.clone()).await {
                error!("Failed to reload {}: {}", entry.title, e);
            }
        }
        result
    }

    pub fn satellite(&self, entry_id: &Uuid) -> Option<Arc<Satellite>> {
        self.satellites.lock().get(entry_id).cloned()
    }

    pub fn satellite_events(&self, entry_id: &Uuid) -> Option<Receiver<SatelliteEvent>> {
        self.satellites.lock().get(entry_id).map(|s| s.events())
    }

    pub fn running_entries(&self) -> Vec<Uuid> {
        self.satellites.lock().keys().copied().collect()
    }
}
