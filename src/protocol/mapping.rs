use super::canonical::{FinishReason, InputTokens, OutputTokens, Usage};
use super::converse::ConverseUsage;

// ---------------------------------------------------------------------------
// Stop reason mappings
// ---------------------------------------------------------------------------

/// Map a Bedrock `stopReason` onto a [`FinishReason`].
///
/// `tool_use` is reported as `stop` when the only tool call was the synthetic
/// `json` tool used for structured output.
#[must_use]
pub fn bedrock_stop_to_finish_reason(raw: &str, is_json_response_from_tool: bool) -> FinishReason {
    match raw {
        "stop_sequence" | "end_turn" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "content_filtered" | "guardrail_intervened" => FinishReason::ContentFilter,
        "tool_use" if is_json_response_from_tool => FinishReason::Stop,
        "tool_use" => FinishReason::ToolCalls,
        _ => FinishReason::Other,
    }
}

// ---------------------------------------------------------------------------
// Stop sequence
// ---------------------------------------------------------------------------

/// The matched stop sequence from `additionalModelResponseFields`.
///
/// `Null` and `Absent` are reported differently: `Null` is written as
/// `"stopSequence": null`, `Absent` omits the key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StopSequence {
    #[default]
    Absent,
    Null,
    Matched(String),
}

impl StopSequence {
    /// Read `stop_sequence` out of a `messageStop` event's
    /// `additionalModelResponseFields`.
    #[must_use]
    pub fn from_response_fields(fields: Option<&serde_json::Value>) -> Self {
        let Some(fields) = fields else {
            return StopSequence::Absent;
        };
        match fields.get("stop_sequence").and_then(serde_json::Value::as_str) {
            Some(seq) if !seq.is_empty() => StopSequence::Matched(seq.to_owned()),
            _ => StopSequence::Null,
        }
    }

    #[must_use]
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            StopSequence::Absent => None,
            StopSequence::Null => Some(serde_json::Value::Null),
            StopSequence::Matched(seq) => Some(serde_json::Value::String(seq.clone())),
        }
    }
}

// ---------------------------------------------------------------------------
// Usage mappings
// ---------------------------------------------------------------------------

/// Convert `metadata.usage` to [`Usage`].
///
/// Cache counters the service did not send stay `None`. When either cache
/// counter is present, the uncached share of the input is
/// `inputTokens - cacheReadInputTokens`.
#[must_use]
pub fn converse_usage_to_canonical(usage: &ConverseUsage) -> Usage {
    let cache_read = usage.cache_read_input_tokens;
    let cache_write = usage.cache_write_input_tokens;
    let no_cache = if cache_read.is_some() || cache_write.is_some() {
        Some(
            usage
                .input_tokens
                .saturating_sub(cache_read.unwrap_or_default()),
        )
    } else {
        None
    };

    Usage {
        input_tokens: InputTokens {
            total: Some(usage.input_tokens),
            no_cache,
            cache_read,
            cache_write,
        },
        output_tokens: OutputTokens {
            total: Some(usage.output_tokens),
            text: Some(usage.output_tokens),
            reasoning: None,
        },
        raw: serde_json::to_value(usage).ok(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
