//! Per-stream reconstruction state.
//!
//! [`StreamSession`] turns demuxed ConverseStream events into
//! [`NormalizedPart`]s. Each content block index gets its own small state
//! machine; parts for an index always run Start, Delta*, then End or ToolCall.
use rustc_hash::FxHashMap;

use crate::error::StreamError;
use crate::protocol::canonical::{
    FinishReason, NormalizedPart, ProviderMetadata, ReasoningMetadata, Usage, Warning,
    PROVIDER_KEY,
};
use crate::protocol::converse::stream::DemuxedEvent;
use crate::protocol::converse::{
    ContentBlockDelta, ContentBlockStart, ConverseStreamEvent, MessageStop, ReasoningContentDelta,
    StreamMetadata,
};
use crate::protocol::eventstream::FrameDrop;
use crate::protocol::mapping::{
    bedrock_stop_to_finish_reason, converse_usage_to_canonical, StopSequence,
};

/// Tool name the request layer uses to force a JSON-formatted answer.
pub const JSON_RESPONSE_TOOL_NAME: &str = "json";

/// Decisions made by the request layer that shape the output stream.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Replayed in the leading `StreamStart` part.
    pub warnings: Vec<Warning>,
    /// Emit a `Raw` part with each event's JSON before its derived parts.
    pub include_raw_chunks: bool,
    /// Surface dropped frames as recoverable `Error` parts.
    pub report_dropped_frames: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    ToolInput,
    Reasoning,
    RedactedReasoning,
    /// Opened by a `contentBlockStart` that did not say what it holds.
    Unknown,
}

#[derive(Debug)]
struct ContentBlockState {
    kind: BlockKind,
    start_emitted: bool,
    accumulated_text: String,
    accumulated_args: String,
    tool_id: String,
    tool_name: String,
    /// The synthetic JSON tool; its input is surfaced as text.
    json_response: bool,
}

impl ContentBlockState {
    fn new(kind: BlockKind) -> Self {
        Self {
            kind,
            start_emitted: false,
            accumulated_text: String::new(),
            accumulated_args: String::new(),
            tool_id: String::new(),
            tool_name: String::new(),
            json_response: false,
        }
    }

    /// Settle an undecided block. A decided kind is never changed.
    fn settle(&mut self, kind: BlockKind) {
        if self.kind == BlockKind::Unknown {
            self.kind = kind;
        }
    }
}

#[derive(Debug, Default)]
struct FinishAccumulator {
    stop_reason: Option<String>,
    stop_sequence: StopSequence,
    usage: Option<Usage>,
    cache_write_input_tokens: Option<u64>,
    trace: Option<serde_json::Value>,
    metrics: Option<serde_json::Value>,
    performance_config: Option<serde_json::Value>,
}

/// Reconstruction state for one inbound stream.
///
/// Not shared: every stream owns its own session.
#[derive(Debug)]
pub struct StreamSession {
    blocks: FxHashMap<u32, ContentBlockState>,
    warnings: Vec<Warning>,
    include_raw_chunks: bool,
    report_dropped_frames: bool,
    is_json_response_from_tool: bool,
    error_occurred: bool,
    started: bool,
    finished: bool,
    events_seen: u64,
    finish: FinishAccumulator,
}

impl StreamSession {
    #[must_use]
    pub fn new(options: SessionOptions) -> Self {
        Self {
            blocks: FxHashMap::default(),
            warnings: options.warnings,
            include_raw_chunks: options.include_raw_chunks,
            report_dropped_frames: options.report_dropped_frames,
            is_json_response_from_tool: false,
            error_occurred: false,
            started: false,
            finished: false,
            events_seen: 0,
            finish: FinishAccumulator::default(),
        }
    }

    /// Emit the leading `StreamStart` part if it has not been emitted yet.
    pub fn start_into(&mut self, out: &mut Vec<NormalizedPart>) {
        if self.started {
            return;
        }
        self.started = true;
        out.push(NormalizedPart::StreamStart {
            warnings: std::mem::take(&mut self.warnings),
        });
    }

    /// Process one demuxed event and return the parts it produced.
    pub fn process(&mut self, demuxed: DemuxedEvent) -> Vec<NormalizedPart> {
        let mut out = Vec::with_capacity(4);
        self.process_into(demuxed, &mut out);
        out
    }

    /// Process one demuxed event, appending its parts to `out`.
    pub fn process_into(&mut self, demuxed: DemuxedEvent, out: &mut Vec<NormalizedPart>) {
        self.start_into(out);
        if self.finished {
            tracing::debug!("event after finish ignored");
            return;
        }
        self.events_seen += 1;

        match demuxed {
            DemuxedEvent::Event { event, raw } => {
                if self.include_raw_chunks {
                    out.push(NormalizedPart::Raw { value: raw });
                }
                self.apply_event(event, out);
            }
            DemuxedEvent::Invalid { detail, raw } => {
                if self.include_raw_chunks {
                    if let Some(value) = raw {
                        out.push(NormalizedPart::Raw { value });
                    }
                }
                tracing::warn!(%detail, "invalid event body");
                self.push_error(StreamError::InvalidBody { detail }, out);
            }
            DemuxedEvent::Ignored { .. } => {}
        }
    }

    /// Note a frame the accumulator dropped.
    pub fn record_frame_drop(&mut self, drop: &FrameDrop, out: &mut Vec<NormalizedPart>) {
        self.start_into(out);
        if self.report_dropped_frames && !self.finished {
            out.push(NormalizedPart::Error {
                error: StreamError::from(&drop.error),
            });
        }
    }

    /// Note a failure of the byte source. The stream still finishes.
    pub fn record_transport_error(&mut self, detail: String, out: &mut Vec<NormalizedPart>) {
        self.start_into(out);
        if self.finished {
            return;
        }
        tracing::warn!(%detail, "byte source failed");
        self.push_error(StreamError::Transport { detail }, out);
    }

    fn push_error(&mut self, error: StreamError, out: &mut Vec<NormalizedPart>) {
        self.error_occurred = true;
        out.push(NormalizedPart::Error { error });
    }

    fn apply_event(&mut self, event: ConverseStreamEvent, out: &mut Vec<NormalizedPart>) {
        match event {
            ConverseStreamEvent::MessageStart(_) => {}
            ConverseStreamEvent::ContentBlockStart(start) => self.on_block_start(start, out),
            ConverseStreamEvent::ContentBlockDelta(delta) => self.on_block_delta(delta, out),
            ConverseStreamEvent::ContentBlockStop(stop) => {
                self.on_block_stop(stop.content_block_index, out);
            }
            ConverseStreamEvent::Metadata(metadata) => self.on_metadata(metadata),
            ConverseStreamEvent::MessageStop(stop) => self.on_message_stop(stop),
            ConverseStreamEvent::Exception { exception, detail } => {
                tracing::warn!(%exception, %detail, "upstream exception in stream");
                self.push_error(StreamError::Upstream { exception, detail }, out);
            }
        }
    }

    fn on_block_start(&mut self, start: ContentBlockStart, out: &mut Vec<NormalizedPart>) {
        let index = start.content_block_index;
        let Some(tool_use) = start.start.and_then(|body| body.tool_use) else {
            self.blocks
                .entry(index)
                .or_insert_with(|| ContentBlockState::new(BlockKind::Unknown));
            return;
        };

        let json_response = tool_use.name == JSON_RESPONSE_TOOL_NAME;
        if json_response {
            self.is_json_response_from_tool = true;
        }

        let block = self
            .blocks
            .entry(index)
            .or_insert_with(|| ContentBlockState::new(BlockKind::ToolInput));
        block.settle(BlockKind::ToolInput);
        if block.start_emitted {
            return;
        }
        block.start_emitted = true;
        block.json_response = json_response;
        block.tool_id = tool_use.tool_use_id;
        block.tool_name = tool_use.name;

        if json_response {
            out.push(NormalizedPart::TextStart {
                id: index.to_string(),
            });
        } else {
            out.push(NormalizedPart::ToolInputStart {
                id: block.tool_id.clone(),
                tool_name: block.tool_name.clone(),
            });
        }
    }

    fn on_block_delta(&mut self, event: ContentBlockDelta, out: &mut Vec<NormalizedPart>) {
        let index = event.content_block_index;
        let delta = event.delta;

        if let Some(text) = delta.text {
            self.on_text_delta(index, text, out);
        } else if let Some(tool_use) = delta.tool_use {
            self.on_tool_delta(index, tool_use.input, out);
        } else if let Some(reasoning) = delta.reasoning_content {
            self.on_reasoning_delta(index, reasoning, out);
        }
    }

    fn on_text_delta(&mut self, index: u32, text: String, out: &mut Vec<NormalizedPart>) {
        if text.is_empty() {
            return;
        }
        let block = self
            .blocks
            .entry(index)
            .or_insert_with(|| ContentBlockState::new(BlockKind::Text));
        block.settle(BlockKind::Text);
        if block.kind != BlockKind::Text {
            tracing::debug!(index, kind = ?block.kind, "text delta for non-text block ignored");
            return;
        }
        let id = index.to_string();
        if !block.start_emitted {
            block.start_emitted = true;
            out.push(NormalizedPart::TextStart { id: id.clone() });
        }
        block.accumulated_text.push_str(&text);
        out.push(NormalizedPart::TextDelta { id, delta: text });
    }

    fn on_tool_delta(&mut self, index: u32, input: String, out: &mut Vec<NormalizedPart>) {
        let Some(block) = self.blocks.get_mut(&index) else {
            tracing::debug!(index, "tool input delta for unopened block ignored");
            return;
        };
        if block.kind != BlockKind::ToolInput {
            tracing::debug!(index, kind = ?block.kind, "tool input delta for non-tool block ignored");
            return;
        }
        block.accumulated_args.push_str(&input);
        if block.json_response {
            out.push(NormalizedPart::TextDelta {
                id: index.to_string(),
                delta: input,
            });
        } else {
            out.push(NormalizedPart::ToolInputDelta {
                id: block.tool_id.clone(),
                delta: input,
            });
        }
    }

    fn on_reasoning_delta(
        &mut self,
        index: u32,
        reasoning: ReasoningContentDelta,
        out: &mut Vec<NormalizedPart>,
    ) {
        let (kind, delta, metadata) = if let Some(text) = reasoning.text {
            (BlockKind::Reasoning, text, None)
        } else if let Some(signature) = reasoning.signature {
            (
                BlockKind::Reasoning,
                String::new(),
                Some(ReasoningMetadata::Signature(signature)),
            )
        } else if let Some(data) = reasoning.data {
            (
                BlockKind::RedactedReasoning,
                String::new(),
                Some(ReasoningMetadata::RedactedData(data)),
            )
        } else {
            return;
        };

        let block = self
            .blocks
            .entry(index)
            .or_insert_with(|| ContentBlockState::new(kind));
        block.settle(kind);
        if !matches!(block.kind, BlockKind::Reasoning | BlockKind::RedactedReasoning) {
            tracing::debug!(index, kind = ?block.kind, "reasoning delta for non-reasoning block ignored");
            return;
        }
        let id = index.to_string();
        if !block.start_emitted {
            block.start_emitted = true;
            out.push(NormalizedPart::ReasoningStart { id: id.clone() });
        }
        block.accumulated_text.push_str(&delta);
        out.push(NormalizedPart::ReasoningDelta {
            id,
            delta,
            metadata,
        });
    }

    fn on_block_stop(&mut self, index: u32, out: &mut Vec<NormalizedPart>) {
        let Some(block) = self.blocks.remove(&index) else {
            tracing::debug!(index, "stop for unknown block ignored");
            return;
        };
        tracing::trace!(
            index,
            kind = ?block.kind,
            text_len = block.accumulated_text.len(),
            args_len = block.accumulated_args.len(),
            "content block closed"
        );
        match block.kind {
            BlockKind::ToolInput if block.json_response => {
                out.push(NormalizedPart::TextEnd {
                    id: index.to_string(),
                });
            }
            BlockKind::ToolInput => {
                let input_json = if block.accumulated_args.is_empty() {
                    "{}".to_owned()
                } else {
                    block.accumulated_args
                };
                out.push(NormalizedPart::ToolInputEnd {
                    id: block.tool_id.clone(),
                });
                out.push(NormalizedPart::ToolCall {
                    id: block.tool_id,
                    tool_name: block.tool_name,
                    input_json,
                });
            }
            BlockKind::Text if block.start_emitted => {
                out.push(NormalizedPart::TextEnd {
                    id: index.to_string(),
                });
            }
            BlockKind::Text
            | BlockKind::Reasoning
            | BlockKind::RedactedReasoning
            | BlockKind::Unknown => {}
        }
    }

    fn on_metadata(&mut self, metadata: StreamMetadata) {
        if let Some(usage) = metadata.usage {
            self.finish.cache_write_input_tokens = usage.cache_write_input_tokens;
            self.finish.usage = Some(converse_usage_to_canonical(&usage));
        }
        if metadata.trace.is_some() {
            self.finish.trace = metadata.trace;
        }
        if metadata.metrics.is_some() {
            self.finish.metrics = metadata.metrics;
        }
        if metadata.performance_config.is_some() {
            self.finish.performance_config = metadata.performance_config;
        }
    }

    fn on_message_stop(&mut self, stop: MessageStop) {
        self.finish.stop_sequence =
            StopSequence::from_response_fields(stop.additional_model_response_fields.as_ref());
        self.finish.stop_reason = Some(stop.stop_reason);
    }

    /// The finish reason as it stands now.
    #[must_use]
    pub fn finish_reason(&self) -> FinishReason {
        if self.error_occurred {
            return FinishReason::Error;
        }
        match self.finish.stop_reason.as_deref() {
            Some(raw) => bedrock_stop_to_finish_reason(raw, self.is_json_response_from_tool),
            None => FinishReason::Unknown,
        }
    }

    #[must_use]
    pub fn is_json_response_from_tool(&self) -> bool {
        self.is_json_response_from_tool
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of demuxed events processed so far.
    #[must_use]
    pub fn events_seen(&self) -> u64 {
        self.events_seen
    }

    fn provider_metadata(&self) -> Option<ProviderMetadata> {
        let mut bedrock = serde_json::Map::new();
        if let Some(stop_sequence) = self.finish.stop_sequence.to_json() {
            bedrock.insert("stopSequence".to_owned(), stop_sequence);
        }
        if let Some(trace) = &self.finish.trace {
            bedrock.insert("trace".to_owned(), trace.clone());
        }
        if let Some(cache_write) = self.finish.cache_write_input_tokens {
            bedrock.insert(
                "usage".to_owned(),
                serde_json::json!({ "cacheWriteInputTokens": cache_write }),
            );
        }
        if let Some(metrics) = &self.finish.metrics {
            bedrock.insert("metrics".to_owned(), metrics.clone());
        }
        if let Some(performance_config) = &self.finish.performance_config {
            bedrock.insert("performanceConfig".to_owned(), performance_config.clone());
        }
        if self.is_json_response_from_tool {
            bedrock.insert(
                "isJsonResponseFromTool".to_owned(),
                serde_json::Value::Bool(true),
            );
        }
        if bedrock.is_empty() {
            return None;
        }
        let mut metadata = ProviderMetadata::new();
        metadata.insert(PROVIDER_KEY.to_owned(), serde_json::Value::Object(bedrock));
        Some(metadata)
    }

    /// Emit the terminal `Finish` part. Later calls emit nothing.
    pub fn finish_into(&mut self, out: &mut Vec<NormalizedPart>) {
        self.start_into(out);
        if self.finished {
            return;
        }
        self.finished = true;
        if !self.blocks.is_empty() {
            tracing::debug!(open_blocks = self.blocks.len(), "stream ended with open blocks");
        }
        out.push(NormalizedPart::Finish {
            finish_reason: self.finish_reason(),
            usage: self.finish.usage.clone().unwrap_or_default(),
            provider_metadata: self.provider_metadata(),
        });
    }

    /// Close the session and return its final parts.
    pub fn finish(&mut self) -> Vec<NormalizedPart> {
        let mut out = Vec::with_capacity(2);
        self.finish_into(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::converse::stream::parse_converse_event;
    use serde_json::json;

    fn feed(
        session: &mut StreamSession,
        sub_type: &str,
        body: serde_json::Value,
    ) -> Vec<NormalizedPart> {
        let bytes = serde_json::to_vec(&body).expect("serialize");
        session.process(parse_converse_event(sub_type, &bytes))
    }

    fn started_session() -> StreamSession {
        let mut session = StreamSession::new(SessionOptions::default());
        let mut out = Vec::new();
        session.start_into(&mut out);
        assert_eq!(out, vec![NormalizedPart::StreamStart { warnings: vec![] }]);
        session
    }

    #[test]
    fn test_text_block_lifecycle() {
        let mut session = started_session();
        let parts = feed(
            &mut session,
            "contentBlockDelta",
            json!({"contentBlockIndex": 0, "delta": {"text": "Hello"}}),
        );
        assert_eq!(
            parts,
            vec![
                NormalizedPart::TextStart { id: "0".into() },
                NormalizedPart::TextDelta {
                    id: "0".into(),
                    delta: "Hello".into()
                },
            ]
        );
        let parts = feed(
            &mut session,
            "contentBlockDelta",
            json!({"contentBlockIndex": 0, "delta": {"text": ", world"}}),
        );
        assert_eq!(parts.len(), 1);
        let parts = feed(&mut session, "contentBlockStop", json!({"contentBlockIndex": 0}));
        assert_eq!(parts, vec![NormalizedPart::TextEnd { id: "0".into() }]);
    }

    #[test]
    fn test_empty_text_delta_ignored() {
        let mut session = started_session();
        let parts = feed(
            &mut session,
            "contentBlockDelta",
            json!({"contentBlockIndex": 0, "delta": {"text": ""}}),
        );
        assert!(parts.is_empty());
        let parts = feed(&mut session, "contentBlockStop", json!({"contentBlockIndex": 0}));
        assert!(parts.is_empty());
    }

    #[test]
    fn test_tool_block_with_fragmented_args() {
        let mut session = started_session();
        let parts = feed(
            &mut session,
            "contentBlockStart",
            json!({"contentBlockIndex": 1, "start": {"toolUse": {"toolUseId": "tooluse_1", "name": "get_weather"}}}),
        );
        assert_eq!(
            parts,
            vec![NormalizedPart::ToolInputStart {
                id: "tooluse_1".into(),
                tool_name: "get_weather".into()
            }]
        );
        for fragment in [r#"{"city":"#, r#""Paris"}"#] {
            let parts = feed(
                &mut session,
                "contentBlockDelta",
                json!({"contentBlockIndex": 1, "delta": {"toolUse": {"input": fragment}}}),
            );
            assert_eq!(
                parts,
                vec![NormalizedPart::ToolInputDelta {
                    id: "tooluse_1".into(),
                    delta: fragment.into()
                }]
            );
        }
        let parts = feed(&mut session, "contentBlockStop", json!({"contentBlockIndex": 1}));
        assert_eq!(
            parts,
            vec![
                NormalizedPart::ToolInputEnd {
                    id: "tooluse_1".into()
                },
                NormalizedPart::ToolCall {
                    id: "tooluse_1".into(),
                    tool_name: "get_weather".into(),
                    input_json: r#"{"city":"Paris"}"#.into(),
                },
            ]
        );
    }

    #[test]
    fn test_tool_delta_for_unopened_block_ignored() {
        let mut session = started_session();
        let parts = feed(
            &mut session,
            "contentBlockDelta",
            json!({"contentBlockIndex": 3, "delta": {"toolUse": {"input": "{}"}}}),
        );
        assert!(parts.is_empty());
    }

    #[test]
    fn test_signature_and_redacted_reasoning_open_their_blocks() {
        let mut session = started_session();
        let parts = feed(
            &mut session,
            "contentBlockDelta",
            json!({"contentBlockIndex": 0, "delta": {"reasoningContent": {"signature": "sig"}}}),
        );
        assert_eq!(
            parts,
            vec![
                NormalizedPart::ReasoningStart { id: "0".into() },
                NormalizedPart::ReasoningDelta {
                    id: "0".into(),
                    delta: String::new(),
                    metadata: Some(ReasoningMetadata::Signature("sig".into())),
                },
            ]
        );
        let parts = feed(
            &mut session,
            "contentBlockDelta",
            json!({"contentBlockIndex": 0, "delta": {"reasoningContent": {"text": "late"}}}),
        );
        assert_eq!(
            parts,
            vec![NormalizedPart::ReasoningDelta {
                id: "0".into(),
                delta: "late".into(),
                metadata: None,
            }]
        );
        let parts = feed(
            &mut session,
            "contentBlockDelta",
            json!({"contentBlockIndex": 1, "delta": {"reasoningContent": {"data": "opaque"}}}),
        );
        assert_eq!(
            parts,
            vec![
                NormalizedPart::ReasoningStart { id: "1".into() },
                NormalizedPart::ReasoningDelta {
                    id: "1".into(),
                    delta: String::new(),
                    metadata: Some(ReasoningMetadata::RedactedData("opaque".into())),
                },
            ]
        );
        assert!(feed(&mut session, "contentBlockStop", json!({"contentBlockIndex": 1})).is_empty());
    }

    #[test]
    fn test_text_delta_on_tool_block_ignored() {
        let mut session = started_session();
        feed(
            &mut session,
            "contentBlockStart",
            json!({"contentBlockIndex": 0, "start": {"toolUse": {"toolUseId": "tooluse_t", "name": "lookup"}}}),
        );
        let parts = feed(
            &mut session,
            "contentBlockDelta",
            json!({"contentBlockIndex": 0, "delta": {"text": "stray"}}),
        );
        assert!(parts.is_empty());
        let parts = feed(&mut session, "contentBlockStop", json!({"contentBlockIndex": 0}));
        assert_eq!(
            parts,
            vec![
                NormalizedPart::ToolInputEnd {
                    id: "tooluse_t".into()
                },
                NormalizedPart::ToolCall {
                    id: "tooluse_t".into(),
                    tool_name: "lookup".into(),
                    input_json: "{}".into(),
                },
            ]
        );
    }

    #[test]
    fn test_reasoning_delta_on_text_block_ignored() {
        let mut session = started_session();
        feed(
            &mut session,
            "contentBlockDelta",
            json!({"contentBlockIndex": 0, "delta": {"text": "answer"}}),
        );
        let parts = feed(
            &mut session,
            "contentBlockDelta",
            json!({"contentBlockIndex": 0, "delta": {"reasoningContent": {"signature": "sig"}}}),
        );
        assert!(parts.is_empty());
        let parts = feed(&mut session, "contentBlockStop", json!({"contentBlockIndex": 0}));
        assert_eq!(parts, vec![NormalizedPart::TextEnd { id: "0".into() }]);
    }

    #[test]
    fn test_finish_defaults_to_unknown() {
        let mut session = started_session();
        assert_eq!(
            session.finish(),
            vec![NormalizedPart::Finish {
                finish_reason: FinishReason::Unknown,
                usage: Usage::default(),
                provider_metadata: None,
            }]
        );
        assert!(session.finish().is_empty());
    }

    #[test]
    fn test_error_keeps_error_reason_over_stop() {
        let mut session = started_session();
        let parts = session.process(parse_converse_event("contentBlockDelta", b"not json"));
        assert!(matches!(
            parts.as_slice(),
            [NormalizedPart::Error {
                error: StreamError::InvalidBody { .. }
            }]
        ));
        feed(&mut session, "messageStop", json!({"stopReason": "end_turn"}));
        assert_eq!(session.finish_reason(), FinishReason::Error);
    }

    #[test]
    fn test_events_after_finish_ignored() {
        let mut session = started_session();
        assert_eq!(session.finish().len(), 1);
        let parts = feed(
            &mut session,
            "contentBlockDelta",
            json!({"contentBlockIndex": 0, "delta": {"text": "late"}}),
        );
        assert!(parts.is_empty());
    }

    #[test]
    fn test_stream_start_emitted_lazily_once() {
        let mut session = StreamSession::new(SessionOptions {
            warnings: vec![Warning::Other {
                message: "topK ignored".into(),
            }],
            ..SessionOptions::default()
        });
        let parts = feed(
            &mut session,
            "contentBlockDelta",
            json!({"contentBlockIndex": 0, "delta": {"text": "a"}}),
        );
        assert_eq!(parts[0].kind(), "stream-start");
        let parts = feed(
            &mut session,
            "contentBlockDelta",
            json!({"contentBlockIndex": 0, "delta": {"text": "b"}}),
        );
        assert_eq!(parts.len(), 1);
    }
}
