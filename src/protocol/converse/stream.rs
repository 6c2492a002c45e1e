use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{ConverseStreamEvent, KNOWN_EXCEPTIONS};
use crate::protocol::eventstream::{Frame, MessageClass};

/// Padding field the service adds to event bodies to obscure payload sizes.
const PADDING_FIELD: &str = "p";

/// Outcome of demuxing one native-shape frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DemuxedEvent {
    /// A validated event plus its `{ "<subType>": body }` JSON form.
    Event {
        event: ConverseStreamEvent,
        raw: serde_json::Value,
    },
    /// The body failed JSON parsing or did not match the event's shape.
    Invalid {
        detail: String,
        raw: Option<serde_json::Value>,
    },
    /// A well-formed event of a kind this decoder does not use.
    Ignored { sub_type: String },
}

/// Demux a decoded frame of the native chat shape.
#[must_use]
pub fn demux_converse_frame(frame: &Frame) -> DemuxedEvent {
    match frame.message_class {
        MessageClass::Event => parse_converse_event(&frame.sub_type, &frame.body),
        MessageClass::Exception | MessageClass::Error => {
            parse_converse_exception(&frame.sub_type, &frame.body)
        }
    }
}

/// Parse and validate an event body for the given `:event-type`.
#[must_use]
pub fn parse_converse_event(sub_type: &str, body: &[u8]) -> DemuxedEvent {
    let value = match parse_body(body) {
        Ok(value) => value,
        Err(err) => {
            return DemuxedEvent::Invalid {
                detail: format!("{sub_type} body is not valid JSON: {err}"),
                raw: None,
            }
        }
    };

    let event = match sub_type {
        "messageStart" => typed(&value).map(ConverseStreamEvent::MessageStart),
        "contentBlockStart" => typed(&value).map(ConverseStreamEvent::ContentBlockStart),
        "contentBlockDelta" => typed(&value).map(ConverseStreamEvent::ContentBlockDelta),
        "contentBlockStop" => typed(&value).map(ConverseStreamEvent::ContentBlockStop),
        "metadata" => typed(&value).map(ConverseStreamEvent::Metadata),
        "messageStop" => typed(&value).map(ConverseStreamEvent::MessageStop),
        other if other.ends_with("Exception") => Ok(ConverseStreamEvent::Exception {
            exception: other.to_owned(),
            detail: value.clone(),
        }),
        _ => {
            tracing::debug!(sub_type, "ignoring unrecognised converse event");
            return DemuxedEvent::Ignored {
                sub_type: sub_type.to_owned(),
            };
        }
    };

    let raw = wrap(sub_type, value);
    match event {
        Ok(event) => DemuxedEvent::Event { event, raw },
        Err(err) => DemuxedEvent::Invalid {
            detail: format!("invalid {sub_type} event: {err}"),
            raw: Some(raw),
        },
    }
}

/// Turn an exception (or error) frame into an exception event.
///
/// Exception bodies are not validated beyond JSON parsing; a body that is not
/// JSON is kept as a string so the detail still reaches the caller.
#[must_use]
pub fn parse_converse_exception(exception: &str, body: &[u8]) -> DemuxedEvent {
    if !KNOWN_EXCEPTIONS.contains(&exception) {
        tracing::debug!(exception, "unrecognised exception class");
    }
    let detail = parse_body(body).unwrap_or_else(|_| {
        serde_json::Value::String(String::from_utf8_lossy(body).into_owned())
    });
    let raw = wrap(exception, detail.clone());
    DemuxedEvent::Event {
        event: ConverseStreamEvent::Exception {
            exception: exception.to_owned(),
            detail,
        },
        raw,
    }
}

fn parse_body(body: &[u8]) -> Result<serde_json::Value, serde_json::Error> {
    let mut value: serde_json::Value = serde_json::from_slice(body)?;
    if let Some(map) = value.as_object_mut() {
        map.remove(PADDING_FIELD);
    }
    Ok(value)
}

fn typed<T: DeserializeOwned>(value: &serde_json::Value) -> Result<T, serde_json::Error> {
    T::deserialize(value)
}

fn wrap(key: &str, value: serde_json::Value) -> serde_json::Value {
    let mut map = serde_json::Map::with_capacity(1);
    map.insert(key.to_owned(), value);
    serde_json::Value::Object(map)
}
