use serde::Serialize;

use crate::error::StreamError;

/// Provider-keyed metadata, e.g. `{"bedrock": {"stopSequence": null}}`.
pub type ProviderMetadata = serde_json::Map<String, serde_json::Value>;

/// Key under which all Bedrock-specific metadata is reported.
pub const PROVIDER_KEY: &str = "bedrock";

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
    Other,
    /// No stop reason was received.
    #[default]
    Unknown,
}

impl FinishReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content-filter",
            FinishReason::ToolCalls => "tool-calls",
            FinishReason::Error => "error",
            FinishReason::Other => "other",
            FinishReason::Unknown => "unknown",
        }
    }
}

/// Input token counters. `None` means the service did not report the value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputTokens {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_cache: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_write: Option<u64>,
}

/// Output token counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputTokens {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: InputTokens,
    pub output_tokens: OutputTokens,
    /// The service's usage object as received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

/// Warning produced by the request layer and replayed at stream start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Warning {
    UnsupportedSetting {
        setting: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    Other {
        message: String,
    },
}

/// Metadata carried by an otherwise empty reasoning delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReasoningMetadata {
    Signature(String),
    RedactedData(String),
}

/// One unit of the normalized output stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum NormalizedPart {
    StreamStart {
        warnings: Vec<Warning>,
    },
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    ReasoningStart {
        id: String,
    },
    ReasoningDelta {
        id: String,
        delta: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<ReasoningMetadata>,
    },
    ToolInputStart {
        id: String,
        tool_name: String,
    },
    ToolInputDelta {
        id: String,
        delta: String,
    },
    ToolInputEnd {
        id: String,
    },
    ToolCall {
        id: String,
        tool_name: String,
        input_json: String,
    },
    Raw {
        value: serde_json::Value,
    },
    Error {
        error: StreamError,
    },
    Finish {
        finish_reason: FinishReason,
        usage: Usage,
        #[serde(skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<ProviderMetadata>,
    },
}

impl NormalizedPart {
    /// The content id a part belongs to, if any.
    #[must_use]
    pub fn content_id(&self) -> Option<&str> {
        match self {
            NormalizedPart::TextStart { id }
            | NormalizedPart::TextDelta { id, .. }
            | NormalizedPart::TextEnd { id }
            | NormalizedPart::ReasoningStart { id }
            | NormalizedPart::ReasoningDelta { id, .. }
            | NormalizedPart::ToolInputStart { id, .. }
            | NormalizedPart::ToolInputDelta { id, .. }
            | NormalizedPart::ToolInputEnd { id }
            | NormalizedPart::ToolCall { id, .. } => Some(id),
            NormalizedPart::StreamStart { .. }
            | NormalizedPart::Raw { .. }
            | NormalizedPart::Error { .. }
            | NormalizedPart::Finish { .. } => None,
        }
    }

    #[must_use]
    pub fn is_finish(&self) -> bool {
        matches!(self, NormalizedPart::Finish { .. })
    }

    /// Wire tag of this part, matching its serialized `type` field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            NormalizedPart::StreamStart { .. } => "stream-start",
            NormalizedPart::TextStart { .. } => "text-start",
            NormalizedPart::TextDelta { .. } => "text-delta",
            NormalizedPart::TextEnd { .. } => "text-end",
            NormalizedPart::ReasoningStart { .. } => "reasoning-start",
            NormalizedPart::ReasoningDelta { .. } => "reasoning-delta",
            NormalizedPart::ToolInputStart { .. } => "tool-input-start",
            NormalizedPart::ToolInputDelta { .. } => "tool-input-delta",
            NormalizedPart::ToolInputEnd { .. } => "tool-input-end",
            NormalizedPart::ToolCall { .. } => "tool-call",
            NormalizedPart::Raw { .. } => "raw",
            NormalizedPart::Error { .. } => "error",
            NormalizedPart::Finish { .. } => "finish",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_part_serializes_with_kebab_tag_and_camel_fields() {
        let part = NormalizedPart::ToolCall {
            id: "tool-1".into(),
            tool_name: "get_weather".into(),
            input_json: "{}".into(),
        };
        let value = serde_json::to_value(&part).expect("serialize");
        assert_eq!(
            value,
            json!({"type": "tool-call", "id": "tool-1", "toolName": "get_weather", "inputJson": "{}"})
        );
        assert_eq!(part.kind(), "tool-call");
    }

    #[test]
    fn test_reasoning_metadata_shapes() {
        let part = NormalizedPart::ReasoningDelta {
            id: "0".into(),
            delta: String::new(),
            metadata: Some(ReasoningMetadata::RedactedData("opaque".into())),
        };
        let value = serde_json::to_value(&part).expect("serialize");
        assert_eq!(value["metadata"], json!({"redactedData": "opaque"}));
    }

    #[test]
    fn test_absent_usage_fields_are_not_serialized() {
        let usage = Usage {
            input_tokens: InputTokens {
                total: Some(4),
                ..InputTokens::default()
            },
            ..Usage::default()
        };
        let value = serde_json::to_value(&usage).expect("serialize");
        assert_eq!(value, json!({"inputTokens": {"total": 4}, "outputTokens": {}}));
    }

    #[test]
    fn test_finish_reason_wire_names() {
        for reason in [
            FinishReason::Stop,
            FinishReason::Length,
            FinishReason::ContentFilter,
            FinishReason::ToolCalls,
            FinishReason::Error,
            FinishReason::Other,
            FinishReason::Unknown,
        ] {
            let value = serde_json::to_value(reason).expect("serialize");
            assert_eq!(value, json!(reason.as_str()));
        }
    }
}
