pub mod session;
pub mod sse;

pub use session::{BlockKind, SessionOptions, StreamSession, JSON_RESPONSE_TOOL_NAME};

use std::pin::Pin;
use std::time::Instant;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use smallvec::SmallVec;

use crate::protocol::canonical::NormalizedPart;
use crate::protocol::converse::stream::demux_converse_frame;
use crate::protocol::eventstream::FrameAccumulator;
use crate::protocol::gateway::demux_gateway_frame;

/// FIFO of items derived from one frame, drained before the next is decoded.
struct PendingQueue<T> {
    items: SmallVec<[Option<T>; 8]>,
    head: usize,
}

impl<T> PendingQueue<T> {
    #[inline]
    fn new() -> Self {
        Self {
            items: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<T> {
        if self.head >= self.items.len() {
            return None;
        }
        let item = self.items[self.head].take();
        self.head += 1;
        if self.head == self.items.len() {
            self.items.clear();
            self.head = 0;
        }
        item
    }

    #[inline]
    fn extend_from_vec(&mut self, batch: &mut Vec<T>) {
        if batch.is_empty() {
            return;
        }
        self.items.reserve(batch.len());
        self.items.extend(batch.drain(..).map(Some));
    }
}

// ---------------------------------------------------------------------------
// Native pipeline: bytes -> frames -> events -> parts
// ---------------------------------------------------------------------------

struct PartPipeline<S> {
    source: Pin<Box<S>>,
    accumulator: FrameAccumulator,
    session: StreamSession,
    scratch: Vec<NormalizedPart>,
    pending: PendingQueue<NormalizedPart>,
    started_at: Instant,
}

impl<S> PartPipeline<S> {
    /// Decode one buffered frame into pending parts. False when none is ready.
    fn step(&mut self) -> bool {
        let Some(decoded) = self.accumulator.next_frame() else {
            return false;
        };
        match decoded {
            Ok(frame) => self
                .session
                .process_into(demux_converse_frame(&frame), &mut self.scratch),
            Err(drop) => self.session.record_frame_drop(&drop, &mut self.scratch),
        }
        self.pending.extend_from_vec(&mut self.scratch);
        true
    }

    fn close(&mut self, transport_error: Option<String>) {
        if let Some(detail) = transport_error {
            self.session
                .record_transport_error(detail, &mut self.scratch);
        }
        if let Some(drop) = self.accumulator.finish() {
            self.session.record_frame_drop(&drop, &mut self.scratch);
        }
        self.session.finish_into(&mut self.scratch);
        if let Some(NormalizedPart::Finish {
            finish_reason,
            usage,
            ..
        }) = self.scratch.last()
        {
            crate::observability::log_stream_complete(
                *finish_reason,
                usage,
                self.session.events_seen(),
                self.accumulator.dropped_frames(),
                self.started_at.elapsed(),
            );
        }
        self.pending.extend_from_vec(&mut self.scratch);
    }
}

/// Decode a native ConverseStream body into normalized parts.
///
/// The first part is always `StreamStart` and the last is always a single
/// `Finish`, including when the source fails part way. Frames are decoded one
/// at a time: the next frame is decoded only once every part derived from the
/// previous one has been consumed, and a new chunk is pulled only when no
/// complete frame is buffered. Dropping the returned stream drops the source.
pub fn part_stream<S, E>(
    byte_stream: S,
    options: SessionOptions,
) -> impl Stream<Item = NormalizedPart> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    part_stream_with(byte_stream, options, FrameAccumulator::new())
}

/// Like [`part_stream`] with a caller-configured accumulator.
pub fn part_stream_with<S, E>(
    byte_stream: S,
    options: SessionOptions,
    accumulator: FrameAccumulator,
) -> impl Stream<Item = NormalizedPart> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let mut pipeline = PartPipeline {
        source: Box::pin(byte_stream),
        accumulator,
        session: StreamSession::new(options),
        scratch: Vec::with_capacity(8),
        pending: PendingQueue::new(),
        started_at: Instant::now(),
    };
    pipeline.session.start_into(&mut pipeline.scratch);
    pipeline.pending.extend_from_vec(&mut pipeline.scratch);

    futures_util::stream::unfold(pipeline, |mut pipeline| async move {
        loop {
            if let Some(part) = pipeline.pending.pop_front() {
                return Some((part, pipeline));
            }
            if pipeline.session.is_finished() {
                return None;
            }
            if pipeline.step() {
                continue;
            }
            match pipeline.source.as_mut().next().await {
                Some(Ok(chunk)) => pipeline.accumulator.push(&chunk),
                Some(Err(err)) => pipeline.close(Some(err.to_string())),
                None => pipeline.close(None),
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Gateway pipeline: bytes -> frames -> SSE records
// ---------------------------------------------------------------------------

struct GatewayPipeline<S> {
    source: Pin<Box<S>>,
    accumulator: FrameAccumulator,
    scratch: Vec<Bytes>,
    pending: PendingQueue<Bytes>,
    closed: bool,
}

impl<S> GatewayPipeline<S> {
    /// Relay one buffered frame. False when none is ready.
    fn step(&mut self) -> bool {
        let Some(decoded) = self.accumulator.next_frame() else {
            return false;
        };
        // Drops are already logged by the accumulator.
        if let Ok(frame) = decoded {
            if let Some(record) = demux_gateway_frame(&frame).to_sse() {
                self.scratch.push(record);
            }
        }
        self.pending.extend_from_vec(&mut self.scratch);
        true
    }

    fn close(&mut self, transport_error: Option<String>) {
        self.closed = true;
        if let Some(detail) = transport_error {
            tracing::warn!(%detail, "byte source failed");
            let body = format!(
                r#"{{"type":"transport_error","message":{}}}"#,
                serde_json::Value::String(detail)
            );
            self.scratch.push(sse::error_sse_frame(body.as_bytes()));
        }
        // A partial tail is logged and discarded.
        let _ = self.accumulator.finish();
        self.pending.extend_from_vec(&mut self.scratch);
    }
}

/// Relay a gateway-shape body as the wrapped model's SSE records.
///
/// Yields `data: <inner-json>\n\n` per chunk, `data: [DONE]\n\n` for
/// `messageStop` and an error envelope for exception frames. Nothing is
/// decoded into parts.
pub fn gateway_sse_stream<S, E>(byte_stream: S) -> impl Stream<Item = Bytes> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    gateway_sse_stream_with(byte_stream, FrameAccumulator::new())
}

/// Like [`gateway_sse_stream`] with a caller-configured accumulator.
pub fn gateway_sse_stream_with<S, E>(
    byte_stream: S,
    accumulator: FrameAccumulator,
) -> impl Stream<Item = Bytes> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let pipeline = GatewayPipeline {
        source: Box::pin(byte_stream),
        accumulator,
        scratch: Vec::with_capacity(2),
        pending: PendingQueue::new(),
        closed: false,
    };

    futures_util::stream::unfold(pipeline, |mut pipeline| async move {
        loop {
            if let Some(record) = pipeline.pending.pop_front() {
                return Some((record, pipeline));
            }
            if pipeline.closed {
                return None;
            }
            if pipeline.step() {
                continue;
            }
            match pipeline.source.as_mut().next().await {
                Some(Ok(chunk)) => pipeline.accumulator.push(&chunk),
                Some(Err(err)) => pipeline.close(Some(err.to_string())),
                None => pipeline.close(None),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::FinishReason;
    use crate::protocol::eventstream::FrameBuilder;
    use std::convert::Infallible;

    fn chunks(parts: Vec<Bytes>) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
        futures_util::stream::iter(parts.into_iter().map(Ok))
    }

    #[test]
    fn test_pending_queue_fifo() {
        let mut queue = PendingQueue::new();
        let mut batch = vec![1, 2, 3];
        queue.extend_from_vec(&mut batch);
        assert!(batch.is_empty());
        assert_eq!(queue.pop_front(), Some(1));
        let mut more = vec![4];
        queue.extend_from_vec(&mut more);
        assert_eq!(queue.pop_front(), Some(2));
        assert_eq!(queue.pop_front(), Some(3));
        assert_eq!(queue.pop_front(), Some(4));
        assert_eq!(queue.pop_front(), None);
    }

    #[tokio::test]
    async fn test_empty_source_yields_start_and_finish() {
        let parts: Vec<NormalizedPart> =
            part_stream(chunks(vec![]), SessionOptions::default()).collect().await;
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].kind(), "stream-start");
        assert!(matches!(
            parts[1],
            NormalizedPart::Finish {
                finish_reason: FinishReason::Unknown,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_transport_error_finishes_with_error() {
        let frame = FrameBuilder::event("contentBlockDelta")
            .json(r#"{"contentBlockIndex":0,"delta":{"text":"Hi"}}"#)
            .encode()
            .expect("encode frame");
        let source = futures_util::stream::iter(vec![
            Ok(frame),
            Err("connection reset".to_owned()),
            Ok(Bytes::from_static(b"never read")),
        ]);
        let parts: Vec<NormalizedPart> =
            part_stream(source, SessionOptions::default()).collect().await;
        let kinds: Vec<&str> = parts.iter().map(NormalizedPart::kind).collect();
        assert_eq!(
            kinds,
            ["stream-start", "text-start", "text-delta", "error", "finish"]
        );
        assert!(matches!(
            parts[4],
            NormalizedPart::Finish {
                finish_reason: FinishReason::Error,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_gateway_transport_error_renders_envelope() {
        let source = futures_util::stream::iter(vec![Err::<Bytes, _>("reset".to_owned())]);
        let records: Vec<Bytes> = gateway_sse_stream(source).collect().await;
        assert_eq!(
            records,
            vec![Bytes::from_static(
                b"data: {\"type\":\"error\",\"error\":{\"type\":\"transport_error\",\"message\":\"reset\"}}\n\n"
            )]
        );
    }

    fn text_frame(text: &str) -> Bytes {
        FrameBuilder::event("contentBlockDelta")
            .json(format!(
                r#"{{"contentBlockIndex":0,"delta":{{"text":"{text}"}}}}"#
            ))
            .encode()
            .expect("encode frame")
    }

    #[test]
    fn test_part_pipeline_decodes_one_frame_per_step() {
        let frames = [text_frame("a"), text_frame("b"), text_frame("c")];
        let wire: Vec<u8> = frames.iter().flat_map(|f| f.iter().copied()).collect();
        let mut pipeline = PartPipeline {
            source: Box::pin(chunks(vec![])),
            accumulator: FrameAccumulator::new(),
            session: StreamSession::new(SessionOptions::default()),
            scratch: Vec::new(),
            pending: PendingQueue::new(),
            started_at: Instant::now(),
        };
        pipeline.accumulator.push(&wire);

        assert!(pipeline.step());
        assert_eq!(
            pipeline.accumulator.buffered_len(),
            frames[1].len() + frames[2].len()
        );
        assert_eq!(pipeline.pending.pop_front().map(|p| p.kind()), Some("text-start"));
        assert_eq!(pipeline.pending.pop_front().map(|p| p.kind()), Some("text-delta"));
        assert!(pipeline.pending.pop_front().is_none());

        assert!(pipeline.step());
        assert!(pipeline.step());
        assert!(!pipeline.step());
        assert_eq!(pipeline.accumulator.buffered_len(), 0);
    }

    #[test]
    fn test_gateway_pipeline_decodes_one_frame_per_step() {
        let stop = FrameBuilder::event("messageStop")
            .json("{}")
            .encode()
            .expect("encode frame");
        let mut pipeline = GatewayPipeline {
            source: Box::pin(chunks(vec![])),
            accumulator: FrameAccumulator::new(),
            scratch: Vec::new(),
            pending: PendingQueue::new(),
            closed: false,
        };
        pipeline.accumulator.push(&stop);
        pipeline.accumulator.push(&stop);

        assert!(pipeline.step());
        assert_eq!(pipeline.accumulator.buffered_len(), stop.len());
        assert_eq!(
            pipeline.pending.pop_front(),
            Some(Bytes::from_static(b"data: [DONE]\n\n"))
        );
        assert!(pipeline.pending.pop_front().is_none());
    }

    #[tokio::test]
    async fn test_parts_arrive_before_rest_of_chunk_is_decoded() {
        let wire: Vec<u8> = [text_frame("a"), text_frame("b")]
            .iter()
            .flat_map(|f| f.iter().copied())
            .collect();
        let stream = part_stream(chunks(vec![Bytes::from(wire)]), SessionOptions::default());
        futures_util::pin_mut!(stream);
        let first: Vec<&str> = stream
            .as_mut()
            .take(3)
            .map(|p| p.kind())
            .collect()
            .await;
        assert_eq!(first, ["stream-start", "text-start", "text-delta"]);
        let rest: Vec<&str> = stream.map(|p| p.kind()).collect().await;
        assert_eq!(rest, ["text-delta", "finish"]);
    }
}
