//! Assist pipeline backed by the Home Assistant websocket API

use crate::pipeline::assist::{AssistPipeline, AudioStream, EventCallback};
use crate::pipeline::events::{PipelineEvent, PipelineEventType, PipelineRun};
use crate::{HassMicError, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Message id used for the single command sent per connection
const RUN_COMMAND_ID: u64 = 1;

/// Home Assistant client that runs one assist pipeline per connection
pub struct HomeAssistantPipeline {
    url: Url,
    token: String,
    handshake_timeout: Duration,
}

impl HomeAssistantPipeline {
    pub fn new(url: Url, token: impl Into<String>) -> Self {
        Self {
            url,
            token: token.into(),
            handshake_timeout: Duration::from_secs(10),
        }
    }

    /// Set how long connecting and authenticating may take
    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn connect_authenticated(&self) -> Result<WsStream> {
        let (mut ws, _response) = timeout(self.handshake_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| {
                HassMicError::PipelineError(format!("Timed out connecting to {}", self.url))
            })?
            .map_err(ws_error)?;

        debug!("Connected to {}, authenticating", self.url);

        loop {
            let frame = timeout(self.handshake_timeout, ws.next())
                .await
                .map_err(|_| HassMicError::AuthError("Timed out during authentication".into()))?;

            let text = match frame {
                Some(Ok(WsMessage::Text(text))) => text,
                Some(Ok(WsMessage::Close(_))) | None => {
                    return Err(HassMicError::AuthError(
                        "Connection closed during authentication".into(),
                    ))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ws_error(e)),
            };

            let value: Value = serde_json::from_str(text.as_str()).map_err(|e| {
                HassMicError::PipelineError(format!("Invalid JSON from Home Assistant: {}", e))
            })?;

            match value.get("type").and_then(Value::as_str) {
                Some("auth_required") => {
                    let auth = json!({ "type": "auth", "access_token": self.token });
                    ws.send(WsMessage::Text(auth.to_string().into()))
                        .await
                        .map_err(ws_error)?;
                }
                Some("auth_ok") => {
                    debug!("Authenticated with Home Assistant");
                    return Ok(ws);
                }
                Some("auth_invalid") => {
                    let message = value
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("invalid access token");
                    return Err(HassMicError::AuthError(message.to_string()));
                }
                other => debug!("Ignoring frame during authentication: {:?}", other),
            }
        }
    }
}

#[async_trait]
impl AssistPipeline for HomeAssistantPipeline {
    async fn run(
        &self,
        run: PipelineRun,
        mut audio: AudioStream,
        on_event: EventCallback,
    ) -> Result<()> {
        let mut ws = self.connect_authenticated().await?;

        let request = run_request(RUN_COMMAND_ID, &run);
        ws.send(WsMessage::Text(request.to_string().into()))
            .await
            .map_err(ws_error)?;
        info!(
            "Started assist pipeline for {} ({})",
            run.satellite_id,
            run.pipeline_id.as_deref().unwrap_or("default")
        );

        // Set once the pipeline tells us where to send audio
        let mut handler_id: Option<u8> = None;

        loop {
            tokio::select! {
                frame = ws.next() => {
                    let text = match frame {
                        Some(Ok(WsMessage::Text(text))) => text,
                        Some(Ok(WsMessage::Close(_))) | None => {
                            return Err(HassMicError::PipelineError(
                                "Home Assistant closed the connection before run-end".into(),
                            ));
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(ws_error(e)),
                    };

                    let value: Value = match serde_json::from_str(text.as_str()) {
                        Ok(value) => value,
                        Err(e) => {
                            warn!("Ignoring invalid JSON from Home Assistant: {}", e);
                            continue;
                        }
                    };

                    if value.get("id").and_then(Value::as_u64) != Some(RUN_COMMAND_ID) {
                        continue;
                    }

                    match value.get("type").and_then(Value::as_str) {
                        Some("result") => {
                            if value.get("success").and_then(Value::as_bool) != Some(true) {
                                let message = value
                                    .pointer("/error/message")
                                    .and_then(Value::as_str)
                                    .unwrap_or("unknown error");
                                return Err(HassMicError::PipelineError(format!(
                                    "assist_pipeline/run rejected: {}",
                                    message
                                )));
                            }
                        }
                        Some("event") => {
                            let Some(event) = value.get("event").and_then(PipelineEvent::from_json) else {
                                continue;
                            };

                            match event.event_type {
                                PipelineEventType::RunStart => {
                                    let id = event
                                        .get_path(&["runner_data", "stt_binary_handler_id"])
                                        .and_then(Value::as_u64);
                                    handler_id = match id.map(u8::try_from) {
                                        None => None,
                                        Some(Ok(id)) => Some(id),
                                        Some(Err(_)) => {
                                            return Err(HassMicError::PipelineError(format!(
                                                "stt_binary_handler_id out of range: {:?}",
                                                id
                                            )));
                                        }
                                    };
                                    debug!("Streaming audio to handler {:?}", handler_id);
                                }
                                PipelineEventType::SttEnd => {
                                    if let Some(id) = handler_id.take() {
                                        end_audio(&mut ws, id).await;
                                    }
                                }
                                _ => {}
                            }

                            let finished = event.event_type == PipelineEventType::RunEnd;
                            on_event(event);

                            if finished {
                                if let Some(id) = handler_id.take() {
                                    end_audio(&mut ws, id).await;
                                }
                                let _ = ws.close(None).await;
                                return Ok(());
                            }
                        }
                        _ => {}
                    }
                }
                chunk = audio.next(), if handler_id.is_some() => {
                    let Some(id) = handler_id else { continue };
                    match chunk {
                        Some(chunk) => {
                            let mut frame = Vec::with_capacity(chunk.len() + 1);
                            frame.push(id);
                            frame.extend_from_slice(&chunk);
                            ws.send(WsMessage::Binary(frame.into()))
                                .await
                                .map_err(ws_error)?;
                        }
                        None => {
                            end_audio(&mut ws, id).await;
                            handler_id = None;
                        }
                    }
                }
            }
        }
    }
}

/// Build the `assist_pipeline/run` command
pub fn run_request(id: u64, run: &PipelineRun) -> Value {
    let mut request = json!({
        "id": id,
        "type": "assist_pipeline/run",
        "start_stage": run.start_stage.as_str(),
        "end_stage": run.end_stage.as_str(),
        "input": { "sample_rate": run.metadata.sample_rate },
    });
    if let Some(pipeline_id) = &run.pipeline_id {
        request["pipeline"] = json!(pipeline_id);
    }
    request
}

// A bare handler byte marks the end of the audio stream
async fn end_audio(ws: &mut WsStream, handler_id: u8) {
    if let Err(e) = ws.send(WsMessage::Binary(vec![handler_id].into())).await {
        debug!("Failed to send end of audio: {}", e);
    }
}

fn ws_error(e: tokio_tungstenite::tungstenite::Error) -> HassMicError {
    HassMicError::PipelineError(format!("Websocket error: {}", e))
}
