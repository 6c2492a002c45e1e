//! Anthropic-over-gateway shape.
//!
//! The service relays the wrapped model's own SSE events inside `chunk`
//! frames, base64-encoded under a `bytes` field. This module unwraps them
//! back into the SSE records the wrapped model would have sent.
use base64::Engine as _;
use bytes::Bytes;

use super::eventstream::{Frame, MessageClass};
use crate::stream::sse::{error_sse_frame, sse_data_frame, DONE_FRAME};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// Inner event JSON, or the untouched body when it could not be unwrapped.
    Passthrough(Bytes),
    /// `messageStop`: the terminal sentinel.
    Done,
    /// Exception or error envelope with its raw body.
    Error(Bytes),
    /// Any other event sub-type.
    Ignored(String),
}

impl GatewayEvent {
    /// Render as an SSE record, or `None` for ignored events.
    #[must_use]
    pub fn to_sse(&self) -> Option<Bytes> {
        match self {
            GatewayEvent::Passthrough(inner) => Some(sse_data_frame(inner)),
            GatewayEvent::Done => Some(Bytes::from_static(DONE_FRAME.as_bytes())),
            GatewayEvent::Error(raw) => Some(error_sse_frame(raw)),
            GatewayEvent::Ignored(_) => None,
        }
    }
}

#[derive(serde::Deserialize)]
struct ChunkBody {
    #[serde(default)]
    bytes: Option<String>,
}

/// Demux one decoded frame of the gateway shape.
#[must_use]
pub fn demux_gateway_frame(frame: &Frame) -> GatewayEvent {
    match frame.message_class {
        MessageClass::Exception | MessageClass::Error => {
            tracing::warn!(
                sub_type = %frame.sub_type,
                body = %frame.body_text(),
                "gateway stream reported an error"
            );
            GatewayEvent::Error(frame.body.clone())
        }
        MessageClass::Event => match frame.sub_type.as_str() {
            "chunk" => GatewayEvent::Passthrough(unwrap_chunk(&frame.body)),
            "messageStop" => GatewayEvent::Done,
            other => {
                tracing::debug!(sub_type = other, "ignoring gateway event");
                GatewayEvent::Ignored(other.to_owned())
            }
        },
    }
}

/// Decode the base64 `bytes` field of a chunk body.
///
/// Falls back to the body itself when the field is missing or unreadable,
/// so nothing the service sent is dropped.
fn unwrap_chunk(body: &Bytes) -> Bytes {
    let encoded = match serde_json::from_slice::<ChunkBody>(body) {
        Ok(ChunkBody {
            bytes: Some(encoded),
        }) => encoded,
        Ok(ChunkBody { bytes: None }) => {
            tracing::debug!("gateway chunk has no bytes field, forwarding body");
            return body.clone();
        }
        Err(err) => {
            tracing::debug!(error = %err, "gateway chunk is not JSON, forwarding body");
            return body.clone();
        }
    };
    match base64::engine::general_purpose::STANDARD.decode(encoded.as_bytes()) {
        Ok(inner) => Bytes::from(inner),
        Err(err) => {
            tracing::warn!(error = %err, "gateway chunk bytes are not base64, forwarding body");
            body.clone()
        }
    }
}
