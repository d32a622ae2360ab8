//! Decoding ntfy SSE frames into inbound messages.

use super::sse::SseFrame;
use serde::Deserialize;

/// ntfy's default priority, used when a message carries none. Below the action threshold.
pub const DEFAULT_PRIORITY: u8 = 3;

/// One decoded ntfy message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// ntfy message id, used to suppress re-delivery after a reconnect.
    pub id: Option<String>,
    pub title: Option<String>,
    pub message: String,
    /// 1 (min) to 5 (max).
    pub priority: u8,
}

impl InboundMessage {
    pub fn new(title: Option<String>, message: impl Into<String>, priority: u8) -> Self {
        Self {
            id: None,
            title,
            message: message.into(),
            priority: priority.clamp(1, 5),
        }
    }

    /// True when this message meets the given threshold.
    pub fn qualifies(&self, min_priority: u8) -> bool {
        self.priority >= min_priority
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("frame data is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unusable priority value: {0}")]
    Priority(String),
}

/// ntfy JSON payload; fields not needed by the bridge are ignored.
#[derive(Debug, Deserialize)]
struct NtfyEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    priority: Option<serde_json::Value>,
}

/// Decode one SSE frame. `Ok(None)` for open/keepalive frames and frames without a message.
pub fn decode_frame(frame: &SseFrame) -> Result<Option<InboundMessage>, FrameDecodeError> {
    let data = frame.data.trim();
    if data.is_empty() {
        return Ok(None);
    }
    let event: NtfyEvent = serde_json::from_str(data)?;
    let kind = event.event.as_deref().or(frame.event.as_deref());
    if matches!(kind, Some(k) if k != "message") {
        return Ok(None);
    }
    let Some(message) = event.message else {
        return Ok(None);
    };
    Ok(Some(InboundMessage {
        id: event.id.or_else(|| frame.id.clone()),
        title: event.title.filter(|t| !t.is_empty()),
        message,
        priority: parse_priority(event.priority.as_ref())?,
    }))
}

fn parse_priority(value: Option<&serde_json::Value>) -> Result<u8, FrameDecodeError> {
    let raw = match value {
        None | Some(serde_json::Value::Null) => return Ok(DEFAULT_PRIORITY),
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .ok_or_else(|| FrameDecodeError::Priority(n.to_string()))?,
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| FrameDecodeError::Priority(s.clone()))?,
        Some(other) => return Err(FrameDecodeError::Priority(other.to_string())),
    };
    Ok(raw.clamp(1, 5) as u8)
}
