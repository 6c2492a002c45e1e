use serde::Serialize;

/// Structural or checksum failure while decoding one event-stream frame.
///
/// Always recoverable from the pipeline's point of view: the offending frame
/// is dropped and decoding continues with the next one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short: {len} bytes")]
    TooShort { len: usize },
    #[error("frame length mismatch: prefix declares {declared} bytes, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("invalid total frame length: {0}")]
    InvalidTotalLength(usize),
    /// Checksum, prelude or header failure reported by the wire decoder.
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("missing header {0}")]
    MissingHeader(&'static str),
    #[error("unknown message type {0:?}")]
    UnknownMessageType(String),
    #[error("cannot encode frame: {0}")]
    Encode(String),
}

/// How an error affects the rest of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Local damage; later events are still meaningful.
    Recoverable,
    /// The upstream gave up on this response.
    Terminal,
}

/// Error surfaced to stream consumers inside an `Error` part.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StreamError {
    /// An exception frame declared by the service (throttling, validation, ...).
    #[error("upstream {exception}: {}", upstream_message(.detail))]
    Upstream {
        exception: String,
        detail: serde_json::Value,
    },
    /// A frame body that is not JSON or does not match any known event shape.
    #[error("invalid event body: {detail}")]
    InvalidBody { detail: String },
    /// A frame that failed checksum or structural validation and was dropped.
    #[error("dropped corrupt frame: {detail}")]
    CorruptFrame { detail: String },
    /// The byte source itself failed.
    #[error("transport error: {detail}")]
    Transport { detail: String },
}

impl StreamError {
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            StreamError::Upstream { .. } | StreamError::Transport { .. } => Severity::Terminal,
            StreamError::InvalidBody { .. } | StreamError::CorruptFrame { .. } => {
                Severity::Recoverable
            }
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.severity() == Severity::Terminal
    }
}

impl From<&FrameError> for StreamError {
    fn from(err: &FrameError) -> Self {
        StreamError::CorruptFrame {
            detail: err.to_string(),
        }
    }
}

fn upstream_message(detail: &serde_json::Value) -> String {
    match detail.get("message").and_then(serde_json::Value::as_str) {
        Some(message) => message.to_owned(),
        None => detail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_severity_split() {
        let upstream = StreamError::Upstream {
            exception: "throttlingException".into(),
            detail: json!({"message": "slow down"}),
        };
        assert_eq!(upstream.severity(), Severity::Terminal);
        assert_eq!(upstream.to_string(), "upstream throttlingException: slow down");

        let body = StreamError::InvalidBody {
            detail: "expected value".into(),
        };
        assert!(!body.is_terminal());
    }

    #[test]
    fn test_serialize_tagged_camel_case() {
        let err = StreamError::CorruptFrame {
            detail: "bad crc".into(),
        };
        let value = serde_json::to_value(&err).expect("serialize");
        assert_eq!(value, json!({"kind": "corruptFrame", "detail": "bad crc"}));
    }

    #[test]
    fn test_upstream_without_message_renders_detail() {
        let err = StreamError::Upstream {
            exception: "internalServerException".into(),
            detail: json!({"code": 500}),
        };
        assert_eq!(
            err.to_string(),
            "upstream internalServerException: {\"code\":500}"
        );
    }
}
