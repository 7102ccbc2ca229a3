pub mod core;
pub mod sensor;
pub mod state;

pub use self::core::{tts_playback_url, Satellite, SatelliteEvent, SatelliteSettings};
pub use sensor::{SensorEntity, SensorSet, SENSORS_ALL};
pub use state::{ConnectionState, PipelinePhase, SessionSnapshot, SessionState, SharedSessionState};
