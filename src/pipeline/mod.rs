pub mod assist;
pub mod events;
pub mod manager;
pub mod websocket;

pub use assist::{queue_stream, AssistPipeline, AudioStream, EventCallback};
pub use events::{PipelineEvent, PipelineEventType, PipelineRun, PipelineStage, SpeechMetadata};
pub use manager::{PipelineManager, PipelineSettings};
pub use websocket::HomeAssistantPipeline;
