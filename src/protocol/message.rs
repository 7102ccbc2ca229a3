use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Message types a satellite can send
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MessageType {
    #[default]
    Unknown,
    AudioChunk,
    ClientInfo,
    Ping,
}

impl MessageType {
    /// Parse a header `type` value; anything unrecognized is `Unknown`
    pub fn from_wire(value: &Value) -> Self {
        match value.as_str() {
            Some("audio-chunk") => MessageType::AudioChunk,
            Some("client-info") => MessageType::ClientInfo,
            Some("ping") => MessageType::Ping,
            _ => MessageType::Unknown,
        }
    }

    /// Name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            MessageType::Unknown => "UNKNOWN",
            MessageType::AudioChunk => "AUDIO_CHUNK",
            MessageType::ClientInfo => "CLIENT_INFO",
            MessageType::Ping => "PING",
        }
    }
}

/// A decoded incoming message
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Message {
    pub message_type: MessageType,
    pub data: Map<String, Value>,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(message_type: MessageType, data: Map<String, Value>, payload: Vec<u8>) -> Self {
        Self {
            message_type,
            data,
            payload,
        }
    }

    /// String field from `data`
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Unsigned integer field from `data`
    pub fn data_u64(&self, key: &str) -> Option<u64> {
        self.data.get(key).and_then(Value::as_u64)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message ({}): {} (payload {} bytes)",
            self.message_type.name(),
            Value::Object(self.data.clone()),
            self.payload.len()
        )
    }
}

/// A message sent from the bridge to a satellite
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub data: Value,
}

impl OutgoingMessage {
    pub const PLAY_TTS: &'static str = "play-tts";

    /// Ask the satellite to fetch and play a TTS response
    pub fn play_tts(url: impl Into<String>) -> Self {
        Self {
            message_type: Self::PLAY_TTS.to_string(),
            data: serde_json::json!({ "url": url.into() }),
        }
    }

    /// Encode as a single newline-terminated JSON line
    pub fn encode(&self) -> Vec<u8> {
        // A String key map with string/JSON values cannot fail to serialize
        let mut line = serde_json::to_vec(self).unwrap_or_default();
        line.push(b'\n');
        line
    }
}

impl fmt::Display for OutgoingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.message_type, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_type_from_wire() {
        assert_eq!(MessageType::from_wire(&json!("audio-chunk")), MessageType::AudioChunk);
        assert_eq!(MessageType::from_wire(&json!("client-info")), MessageType::ClientInfo);
        assert_eq!(MessageType::from_wire(&json!("ping")), MessageType::Ping);
        assert_eq!(MessageType::from_wire(&json!("reboot")), MessageType::Unknown);
        assert_eq!(MessageType::from_wire(&json!(42)), MessageType::Unknown);
    }

    #[test]
    fn test_play_tts_encoding() {
        let msg = OutgoingMessage::play_tts("http://ha.local:8123/api/tts_proxy/a.mp3");
        let encoded = msg.encode();
        assert_eq!(encoded.last(), Some(&b'\n'));

        let value: Value = serde_json::from_slice(&encoded[..encoded.len() - 1]).unwrap();
        assert_eq!(value["type"], "play-tts");
        assert_eq!(value["data"]["url"], "http://ha.local:8123/api/tts_proxy/a.mp3");
    }

    #[test]
    fn test_message_display() {
        let mut data = Map::new();
        data.insert("rate".into(), json!(16000));
        let msg = Message::new(MessageType::AudioChunk, data, vec![0; 4]);
        assert_eq!(
            msg.to_string(),
            "Message (AUDIO_CHUNK): {\"rate\":16000} (payload 4 bytes)"
        );
    }
}
