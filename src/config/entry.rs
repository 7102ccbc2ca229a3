use crate::{HassMicError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Port the companion app listens on unless told otherwise
pub const DEFAULT_PORT: u16 = 11700;

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// User-supplied connection details for a satellite
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryData {
    pub name: String,
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl EntryData {
    pub fn new(name: impl Into<String>, hostname: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            hostname: hostname.into(),
            port,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(HassMicError::ConfigError("Entry name must not be empty".into()));
        }
        if self.hostname.trim().is_empty() {
            return Err(HassMicError::ConfigError("Entry hostname must not be empty".into()));
        }
        if self.port == 0 {
            return Err(HassMicError::ConfigError(
                "Entry port must be between 1 and 65535".into(),
            ));
        }
        Ok(())
    }
}

/// A configured satellite
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub entry_id: Uuid,
    /// The device's own uuid, from its client info
    pub unique_id: String,
    pub title: String,
    #[serde(flatten)]
    pub data: EntryData,
}

impl ConfigEntry {
    pub fn new(unique_id: impl Into<String>, title: impl Into<String>, data: EntryData) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            unique_id: unique_id.into(),
            title: title.into(),
            data,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.data.hostname, self.data.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.unique_id.trim().is_empty() {
            return Err(HassMicError::ConfigError(format!(
                "Entry '{}' has no unique id",
                self.title
            )));
        }
        self.data.validate()
    }
}

/// Thread-safe list of config entries
#[derive(Clone, Default)]
pub struct EntryRegistry {
    inner: Arc<RwLock<Vec<ConfigEntry>>>,
}

impl EntryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<ConfigEntry>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(entries)),
        }
    }

    /// Add an entry; its entry id must be new
    pub fn add(&self, entry: ConfigEntry) -> Result<()> {
        let mut entries = self.inner.write();
        if entries.iter().any(|e| e.entry_id == entry.entry_id) {
            return Err(HassMicError::ConfigError(format!(
                "Entry {} already exists",
                entry.entry_id
            )));
        }
        entries.push(entry);
        Ok(())
    }

    /// Replace the entry with the same entry id, returning whether one existed
    pub fn update(&self, entry: ConfigEntry) -> bool {
        let mut entries = self.inner.write();
        match entries.iter_mut().find(|e| e.entry_id == entry.entry_id) {
            Some(existing) => {
                *existing = entry;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, entry_id: &Uuid) -> Option<ConfigEntry> {
        let mut entries = self.inner.write();
        let index = entries.iter().position(|e| &e.entry_id == entry_id)?;
        Some(entries.remove(index))
    }

    pub fn get(&self, entry_id: &Uuid) -> Option<ConfigEntry> {
        self.inner.read().iter().find(|e| &e.entry_id == entry_id).cloned()
    }

    pub fn find_by_unique_id(&self, unique_id: &str) -> Option<ConfigEntry> {
        self.inner
            .read()
            .iter()
            .find(|e| e.unique_id == unique_id)
            .cloned()
    }

    pub fn entries(&self) -> Vec<ConfigEntry> {
        self.inner.read().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kitchen() -> ConfigEntry {
        ConfigEntry::new("dev-1", "Kitchen", EntryData::new("Kitchen", "192.168.1.20", DEFAULT_PORT))
    }

    #[test]
    fn test_entry_data_validation() {
        assert!(EntryData::new("Kitchen", "10.0.0.2", 11700).validate().is_ok());
        assert!(EntryData::new("", "10.0.0.2", 11700).validate().is_err());
        assert!(EntryData::new("Kitchen", " ", 11700).validate().is_err());
        assert!(EntryData::new("Kitchen", "10.0.0.2", 0).validate().is_err());
    }

    #[test]
    fn test_port_defaults_when_missing() {
        let data: EntryData = serde_json::from_str(r#"{"name":"a","hostname":"b"}"#).unwrap();
        assert_eq!(data.port, DEFAULT_PORT);
    }

    #[test]
    fn test_registry_lookup_update_remove() {
        let registry = EntryRegistry::new();
        let entry = kitchen();
        registry.add(entry.clone()).unwrap();
        assert!(registry.add(entry.clone()).is_err());

        assert_eq!(registry.find_by_unique_id("dev-1"), Some(entry.clone()));
        assert!(registry.find_by_unique_id("dev-2").is_none());

        let mut moved = entry.clone();
        moved.data.hostname = "192.168.1.21".into();
        assert!(registry.update(moved));
        assert_eq!(registry.get(&entry.entry_id).unwrap().data.hostname, "192.168.1.21");

        assert!(registry.remove(&entry.entry_id).is_some());
        assert!(registry.is_empty());
        assert!(!registry.update(entry));
    }

    #[test]
    fn test_registry_clones_share_entries() {
        let registry = EntryRegistry::new();
        let other = registry.clone();
        registry.add(kitchen()).unwrap();
        assert_eq!(other.len(), 1);
    }
}
