pub mod audio;
pub mod config;
pub mod connection;
pub mod integration;
pub mod pipeline;
pub mod protocol;
pub mod satellite;

use thiserror::Error;

/// Integration domain, used for device identifiers.
pub const DOMAIN: &str = "hassmic";

#[derive(Error, Debug, Clone)]
pub enum HassMicError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Bad message: {0}")]
    BadMessage(String),

    #[error("Bad client info: {0}")]
    BadClientInfo(String),

    #[error("Pipeline error: {0}")]
    PipelineError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Audio processing error: {0}")]
    AudioProcessingError(String),

    #[error("IO error: {0}")]
    IOError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<std::io::Error> for HassMicError {
    fn from(e: std::io::Error) -> Self {
        HassMicError::IOError(e.to_string())
    }
}

impl From<protocol::ProtocolError> for HassMicError {
    fn from(e: protocol::ProtocolError) -> Self {
        match e {
            protocol::ProtocolError::Io(e) => HassMicError::ConnectionError(e.to_string()),
            protocol::ProtocolError::BadMessage(msg) => HassMicError::BadMessage(msg),
        }
    }
}

impl HassMicError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Devices restart and networks drop; the next attempt may work
            HassMicError::ConnectionError(_) => true,
            HassMicError::BadMessage(_) => true,
            // The device answered, but not like a hassmic app
            HassMicError::BadClientInfo(_) => false,
            HassMicError::PipelineError(_) => true,
            // A bad token stays bad
            HassMicError::AuthError(_) => false,
            HassMicError::AudioProcessingError(_) => true,
            HassMicError::IOError(_) => false,
            HassMicError::ConfigError(_) => false,
        }
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            HassMicError::ConnectionError(_) => {
                "Could not reach the satellite. Check that the app is running.".to_string()
            }
            HassMicError::BadMessage(_) => {
                "The satellite sent a malformed message.".to_string()
            }
            HassMicError::BadClientInfo(_) => {
                "The device did not identify itself as a hassmic satellite.".to_string()
            }
            HassMicError::PipelineError(_) => {
                "The assist pipeline failed. It will be restarted.".to_string()
            }
            HassMicError::AuthError(_) => {
                "Home Assistant rejected the access token.".to_string()
            }
            HassMicError::AudioProcessingError(_) => {
                "Audio from the satellite could not be processed.".to_string()
            }
            HassMicError::IOError(_) => "File system error occurred.".to_string(),
            HassMicError::ConfigError(_) => {
                "Configuration error. Please check settings.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, HassMicError>;
