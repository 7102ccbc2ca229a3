//! Adding satellites, by hand or from zeroconf discovery

use crate::config::discovery::ZeroconfServiceInfo;
use crate::config::entry::{ConfigEntry, EntryData, EntryRegistry};
use crate::protocol::{recv_message, MessageType, DEFAULT_EXTRA_DATA_TIMEOUT};
use crate::{HassMicError, Result};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// How long a satellite gets to introduce itself
pub const VALIDATION_TIMEOUT: Duration = Duration::from_secs(2);

const DEFAULT_TITLE: &str = "hassmic";

/// Connect to a satellite and return the uuid from its client info
pub async fn validate_connection_params(host: &str, port: u16, wait: Duration) -> Result<String> {
    debug!("Trying to validate connection to {}:{}", host, port);

    let stream = timeout(wait, TcpStream::connect((host, port)))
        .await
        .map_err(|_| {
            HassMicError::ConnectionError(format!("Timed out connecting to {}:{}", host, port))
        })?
        .map_err(|e| {
            HassMicError::ConnectionError(format!("Failed to connect to {}:{}: {}", host, port, e))
        })?;

    // The stream is dropped, and so closed, on every path out
    let mut reader = BufReader::new(stream);
    let message = match timeout(wait, recv_message(&mut reader, DEFAULT_EXTRA_DATA_TIMEOUT)).await {
        Ok(Ok(Some(message))) => message,
        Ok(Ok(None)) => {
            return Err(HassMicError::BadClientInfo(
                "Connection closed before client info".into(),
            ))
        }
        Ok(Err(e)) => return Err(HassMicError::BadClientInfo(e.to_string())),
        Err(_) => {
            return Err(HassMicError::BadClientInfo(
                "Timed out waiting for client info".into(),
            ))
        }
    };

    if message.message_type != MessageType::ClientInfo {
        return Err(HassMicError::BadClientInfo(format!(
            "Expected client-info, got {}",
            message.message_type.name()
        )));
    }
    message
        .data_str("uuid")
        .map(str::to_string)
        .ok_or_else(|| HassMicError::BadClientInfo("Client info has no uuid".into()))
}

/// What a flow step wants to happen next
#[derive(Clone, Debug, PartialEq)]
pub enum FlowResult {
    /// Ask the user for (more) input
    Form {
        step_id: &'static str,
        suggested: Option<EntryData>,
        errors: Vec<String>,
        title_placeholder: Option<String>,
    },
    CreateEntry(ConfigEntry),
    Abort {
        reason: &'static str,
        /// Entry touched by the abort, if any
        entry: Option<ConfigEntry>,
        /// The entry changed and its satellite should be restarted
        reload: bool,
    },
}

impl FlowResult {
    pub fn is_form(&self) -> bool {
        matches!(self, FlowResult::Form { .. })
    }
}

/// One pass through adding a satellite
pub struct ConfigFlow {
    registry: EntryRegistry,
    validation_timeout: Duration,
    unique_id: Option<String>,
    discovered: Option<(String, u16)>,
    title_placeholder: Option<String>,
}

impl ConfigFlow {
    pub fn new(registry: EntryRegistry) -> Self {
        Self {
            registry,
            validation_timeout: VALIDATION_TIMEOUT,
            unique_id: None,
            discovered: None,
            title_placeholder: None,
        }
    }

    pub fn with_validation_timeout(mut self, validation_timeout: Duration) -> Self {
        self.validation_timeout = validation_timeout;
        self
    }

    pub fn unique_id(&self) -> Option<&str> {
        self.unique_id.as_deref()
    }

    /// Manual setup
    pub async fn step_user(&mut self, input: Option<EntryData>) -> FlowResult {
        let Some(input) = input else {
            return self.form("user", None, Vec::new());
        };
        debug!("user_input={:?}", input);

        match self.try_create_from_user(&input).await {
            Ok(result) => result,
            Err(e) => {
                error!("Error: {}", e);
                self.form("user", Some(input), vec![e.to_string()])
            }
        }
    }

    async fn try_create_from_user(&mut self, input: &EntryData) -> Result<FlowResult> {
        input.validate()?;
        let uuid =
            validate_connection_params(&input.hostname, input.port, self.validation_timeout).await?;
        debug!("Got uuid from host: {}", uuid);
        self.unique_id = Some(uuid.clone());

        if let Some(existing) = self.registry.find_by_unique_id(&uuid) {
            return Ok(FlowResult::Abort {
                reason: "already_configured",
                entry: Some(existing),
                reload: false,
            });
        }

        let entry = ConfigEntry::new(uuid, input.name.clone(), input.clone());
        self.registry.add(entry.clone())?;
        Ok(FlowResult::CreateEntry(entry))
    }

    /// Setup started by a zeroconf record
    pub fn step_zeroconf(&mut self, info: ZeroconfServiceInfo) -> FlowResult {
        if !info.is_hassmic_service() {
            warn!("Ignoring non-hassmic service {}", info.name);
            return FlowResult::Abort {
                reason: "not_hassmic_device",
                entry: None,
                reload: false,
            };
        }

        let uuid = info.device_uuid().to_string();
        let host = info.ip_address.to_string();
        let port = info.port;
        debug!("matched zeroconf: '{}'", uuid);
        self.unique_id = Some(uuid.clone());

        if let Some(mut existing) = self.registry.find_by_unique_id(&uuid) {
            let changed = existing.data.hostname != host || existing.data.port != port;
            if changed {
                debug!("Updating {} to {}:{}", existing.title, host, port);
                existing.data.hostname = host;
                existing.data.port = port;
                self.registry.update(existing.clone());
            }
            return FlowResult::Abort {
                reason: "already_configured",
                entry: Some(existing),
                reload: changed,
            };
        }

        self.title_placeholder = Some(format!("{} @ {}:{}", DEFAULT_TITLE, host, port));
        debug!("Found unregistered zeroconf: '{}'", uuid);
        debug!("Zeroconf info: '{:?}'", info);
        self.discovered = Some((host, port));
        self.step_discovery_confirm(None)
    }

    /// Confirm a discovered satellite
    pub fn step_discovery_confirm(&mut self, input: Option<EntryData>) -> FlowResult {
        let (Some(uuid), Some((host, port))) = (self.unique_id.clone(), self.discovered.clone())
        else {
            return FlowResult::Abort {
                reason: "not_discovered",
                entry: None,
                reload: false,
            };
        };

        let Some(mut input) = input else {
            let suggested = EntryData::new(format!("{} @ {}", DEFAULT_TITLE, host), host, port);
            return self.form("discovery_confirm", Some(suggested), Vec::new());
        };

        if input.name.trim().is_empty() {
            input.name = DEFAULT_TITLE.to_string();
        }
        if let Err(e) = input.validate() {
            return self.form("discovery_confirm", Some(input), vec![e.to_string()]);
        }

        let entry = ConfigEntry::new(uuid, input.name.clone(), input);
        match self.registry.add(entry.clone()) {
            Ok(()) => FlowResult::CreateEntry(entry),
            Err(e) => self.form("discovery_confirm", Some(entry.data), vec![e.to_string()]),
        }
    }

    fn form(&self, step_id: &'static str, suggested: Option<EntryData>, errors: Vec<String>) -> FlowResult {
        FlowResult::Form {
            step_id,
            suggested,
            errors,
            title_placeholder: self.title_placeholder.clone(),
        }
    }
}
