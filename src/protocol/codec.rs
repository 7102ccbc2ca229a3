use super::message::{Message, MessageType};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tokio::time::timeout;

/// How long the extra data and payload may lag behind their header
pub const DEFAULT_EXTRA_DATA_TIMEOUT: Duration = Duration::from_millis(500);

/// Largest payload accepted from a satellite
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Longest JSON header line, newline included
pub const MAX_HEADER_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The transport failed; the stream can no longer be trusted
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A single frame was malformed; the stream may still be usable
    #[error("Bad message: {0}")]
    BadMessage(String),
}

impl ProtocolError {
    pub fn is_bad_message(&self) -> bool {
        matches!(self, ProtocolError::BadMessage(_))
    }
}

/// Read one message from the stream
///
/// Returns `Ok(None)` once the peer has closed the stream.
pub async fn recv_message<R>(
    reader: &mut R,
    extra_timeout: Duration,
) -> Result<Option<Message>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = (&mut *reader)
            .take(MAX_HEADER_SIZE as u64)
            .read_until(b'\n', &mut line)
            .await?;
        if read == 0 {
            return Ok(None);
        }
        if read == MAX_HEADER_SIZE && line.last() != Some(&b'\n') {
            return Err(ProtocolError::BadMessage(format!(
                "Header line longer than {} bytes",
                MAX_HEADER_SIZE
            )));
        }
        if !line.iter().all(u8::is_ascii_whitespace) {
            break;
        }
    }

    let header = decode_object(&line, "header")?;

    let message_type = match header.get("type") {
        Some(t) => MessageType::from_wire(t),
        None => {
            return Err(ProtocolError::BadMessage(format!(
                "Field 'type' not in msg: '{}'",
                Value::Object(header.clone())
            )))
        }
    };

    let mut data = match header.get("data") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            return Err(ProtocolError::BadMessage(format!(
                "Field 'data' is not an object: '{}'",
                other
            )))
        }
    };

    if let Some(len) = positive_length(&header, "data_length")? {
        let extra = read_exact_within(reader, len, extra_timeout, "extra data").await?;
        data.extend(decode_object(&extra, "extra data")?);
    }

    let payload = match positive_length(&header, "payload_length")? {
        Some(len) => read_exact_within(reader, len, extra_timeout, "payload").await?,
        None => Vec::new(),
    };

    Ok(Some(Message::new(message_type, data, payload)))
}

fn decode_object(bytes: &[u8], what: &str) -> Result<Map<String, Value>, ProtocolError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ProtocolError::BadMessage(format!("Couldn't decode {}: {}", what, e)))?;

    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ProtocolError::BadMessage(format!(
            "Expected a JSON object for {}: '{}'",
            what, other
        ))),
        Err(e) => Err(ProtocolError::BadMessage(format!(
            "Failed to decode JSON for {}: '{}' ({})",
            what,
            text.trim(),
            e
        ))),
    }
}

/// Read a length field; absent, negative and zero all mean "nothing follows"
fn positive_length(header: &Map<String, Value>, key: &str) -> Result<Option<usize>, ProtocolError> {
    let Some(value) = header.get(key) else {
        return Ok(None);
    };

    let len = value
        .as_i64()
        .ok_or_else(|| ProtocolError::BadMessage(format!("Field '{}' is not an integer", key)))?;

    if len <= 0 {
        return Ok(None);
    }

    let len = len as usize;
    if len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::BadMessage(format!(
            "Field '{}' too large: {} > {}",
            key, len, MAX_PAYLOAD_SIZE
        )));
    }

    Ok(Some(len))
}

async fn read_exact_within<R>(
    reader: &mut R,
    len: usize,
    limit: Duration,
    what: &str,
) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = vec![0u8; len];
    match timeout(limit, reader.read_exact(&mut buf)).await {
        Ok(Ok(_)) => Ok(buf),
        Ok(Err(e)) => Err(ProtocolError::Io(e)),
        Err(_) => Err(ProtocolError::BadMessage(format!(
            "Timed out waiting for {}",
            what
        ))),
    }
}
