use bytes::BytesMut;

use super::decoder::{decode_frame, read_u32_be};
use super::{Frame, MAX_FRAME_LEN, MIN_FRAME_LEN};
use crate::error::FrameError;

/// A candidate frame that was discarded instead of decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDrop {
    pub error: FrameError,
    pub discarded_bytes: usize,
}

/// Incremental frame splitter.
///
/// Feed it body chunks with arbitrary boundaries and it yields fully decoded
/// [`Frame`]s. At most one partial frame is held between calls.
///
/// Each candidate is exactly the number of bytes its length prefix declares.
/// A candidate that fails decoding (bad prelude CRC, bad headers, bad
/// message CRC) is dropped and the next frame is read from the following
/// byte. Only a length prefix outside the protocol limits leaves no boundary
/// to resume from; then everything buffered is discarded.
#[derive(Debug)]
pub struct FrameAccumulator {
    buffer: BytesMut,
    max_frame_len: usize,
    dropped_frames: u64,
}

impl FrameAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_len(MAX_FRAME_LEN)
    }

    #[must_use]
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_frame_len: max_frame_len.clamp(MIN_FRAME_LEN, MAX_FRAME_LEN),
            dropped_frames: 0,
        }
    }

    /// Feed raw bytes and return the frames completed by them.
    ///
    /// Dropped frames are logged and counted but not returned.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out.into_iter().filter_map(Result::ok).collect()
    }

    /// Feed raw bytes and append decoded frames and drops, in wire order,
    /// into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &[u8], out: &mut Vec<Result<Frame, FrameDrop>>) {
        self.push(chunk);
        while let Some(decoded) = self.next_frame() {
            out.push(decoded);
        }
    }

    /// Buffer raw bytes without decoding anything yet.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Split off and decode the next buffered candidate.
    ///
    /// Returns `None` once the window holds no complete frame.
    pub fn next_frame(&mut self) -> Option<Result<Frame, FrameDrop>> {
        if self.buffer.len() < 4 {
            return None;
        }
        let declared = read_u32_be(&self.buffer, 0) as usize;
        if !(MIN_FRAME_LEN..=self.max_frame_len).contains(&declared) {
            let discarded = self.buffer.len();
            self.buffer.clear();
            return Some(Err(
                self.record_drop(FrameError::InvalidTotalLength(declared), discarded)
            ));
        }
        if self.buffer.len() < declared {
            return None;
        }

        let candidate = self.buffer.split_to(declared);
        match decode_frame(&candidate) {
            Ok(frame) => {
                tracing::trace!(
                    message_class = frame.message_class.as_str(),
                    sub_type = %frame.sub_type,
                    len = declared,
                    "decoded event-stream frame"
                );
                Some(Ok(frame))
            }
            Err(error) => Some(Err(self.record_drop(error, declared))),
        }
    }

    fn record_drop(&mut self, error: FrameError, discarded_bytes: usize) -> FrameDrop {
        self.dropped_frames += 1;
        tracing::warn!(
            error = %error,
            discarded_bytes,
            "dropping corrupt event-stream frame"
        );
        FrameDrop {
            error,
            discarded_bytes,
        }
    }

    /// Signal end of input.
    ///
    /// Returns a drop record when a partial frame was left behind.
    pub fn finish(&mut self) -> Option<FrameDrop> {
        if self.buffer.is_empty() {
            return None;
        }
        let discarded_bytes = self.buffer.len();
        let error = if discarded_bytes < 4 {
            FrameError::TooShort {
                len: discarded_bytes,
            }
        } else {
            FrameError::LengthMismatch {
                declared: read_u32_be(&self.buffer, 0) as usize,
                actual: discarded_bytes,
            }
        };
        self.buffer.clear();
        self.dropped_frames += 1;
        tracing::warn!(
            error = %error,
            discarded_bytes,
            "event stream ended inside a frame"
        );
        Some(FrameDrop {
            error,
            discarded_bytes,
        })
    }

    /// Bytes received but not yet consumed into a frame.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Number of candidates dropped so far.
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }
}

impl Default for FrameAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::eventstream::{FrameBuilder, PRELUDE_LEN};
    use bytes::Bytes;

    fn delta_frame(text: &str) -> Bytes {
        FrameBuilder::event("contentBlockDelta")
            .json(format!(
                r#"{{"contentBlockIndex":0,"delta":{{"text":"{text}"}}}}"#
            ))
            .encode()
            .expect("encode frame")
    }

    fn with_bad_prelude_crc(frame: &Bytes) -> Vec<u8> {
        let mut raw = frame.to_vec();
        raw[8] ^= 0x01;
        raw
    }

    fn bodies(out: &[Result<Frame, FrameDrop>]) -> Vec<String> {
        out.iter()
            .map(|item| match item {
                Ok(frame) => frame.body_text().into_owned(),
                Err(_) => "<dropped>".to_owned(),
            })
            .collect()
    }

    #[test]
    fn test_many_frames_in_one_chunk() {
        let mut wire = Vec::new();
        for text in ["a", "b", "c"] {
            wire.extend_from_slice(&delta_frame(text));
        }
        let mut acc = FrameAccumulator::new();
        let frames = acc.feed(&wire);
        assert_eq!(frames.len(), 3);
        assert!(frames[2].body_text().contains("\"c\""));
        assert_eq!(acc.buffered_len(), 0);
    }

    #[test]
    fn test_frame_split_at_midpoint() {
        let frame = delta_frame("hello");
        let mid = frame.len() / 2;
        let mut acc = FrameAccumulator::new();
        assert!(acc.feed(&frame[..mid]).is_empty());
        assert_eq!(acc.buffered_len(), mid);
        let frames = acc.feed(&frame[mid..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(acc.buffered_len(), 0);
    }

    #[test]
    fn test_byte_at_a_time() {
        let frame = delta_frame("slow");
        let mut acc = FrameAccumulator::new();
        let mut frames = Vec::new();
        for byte in frame.iter() {
            frames.extend(acc.feed(std::slice::from_ref(byte)));
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sub_type, "contentBlockDelta");
    }

    #[test]
    fn test_corrupt_frame_dropped_and_next_decoded() {
        let mut bad = delta_frame("bad").to_vec();
        let last = bad.len() - 1;
        bad[last] ^= 0xff;
        let good = delta_frame("good");

        let mut acc = FrameAccumulator::new();
        let mut out = Vec::new();
        acc.feed_into(&bad, &mut out);
        acc.feed_into(&good, &mut out);

        assert_eq!(out.len(), 2);
        let drop = out[0].as_ref().expect_err("dropped");
        assert!(matches!(drop.error, FrameError::Malformed(_)));
        assert_eq!(drop.discarded_bytes, bad.len());
        assert!(out[1].as_ref().expect("decoded").body_text().contains("good"));
        assert_eq!(acc.dropped_frames(), 1);
    }

    #[test]
    fn test_zero_length_prefix_discards_window_without_looping() {
        let mut acc = FrameAccumulator::new();
        let mut out = Vec::new();
        acc.feed_into(&[0, 0, 0, 0, 1, 2, 3], &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].as_ref().expect_err("dropped").error,
            FrameError::InvalidTotalLength(0)
        );
        assert_eq!(acc.buffered_len(), 0);

        let frames = acc.feed(&delta_frame("after"));
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_bad_prelude_crc_waits_for_declared_length() {
        let frame = delta_frame("x");
        let bad = with_bad_prelude_crc(&frame);
        let mut acc = FrameAccumulator::new();
        let mut out = Vec::new();
        acc.feed_into(&bad[..PRELUDE_LEN], &mut out);
        assert!(out.is_empty());
        assert_eq!(acc.buffered_len(), PRELUDE_LEN);

        acc.feed_into(&bad[PRELUDE_LEN..], &mut out);
        let drop = out[0].as_ref().expect_err("dropped");
        assert!(matches!(drop.error, FrameError::Malformed(_)));
        assert_eq!(drop.discarded_bytes, frame.len());
        assert_eq!(acc.buffered_len(), 0);
    }

    #[test]
    fn test_bad_prelude_crc_keeps_following_frames() {
        let bad = with_bad_prelude_crc(&delta_frame("a"));
        let mut wire = bad.clone();
        wire.extend_from_slice(&delta_frame("b"));
        wire.extend_from_slice(&delta_frame("c"));

        let mut acc = FrameAccumulator::new();
        let mut out = Vec::new();
        acc.feed_into(&wire, &mut out);
        let expected = vec![
            "<dropped>".to_owned(),
            r#"{"contentBlockIndex":0,"delta":{"text":"b"}}"#.to_owned(),
            r#"{"contentBlockIndex":0,"delta":{"text":"c"}}"#.to_owned(),
        ];
        assert_eq!(bodies(&out), expected);

        let mut acc = FrameAccumulator::new();
        let mut out = Vec::new();
        for chunk in wire.chunks(20) {
            acc.feed_into(chunk, &mut out);
        }
        assert_eq!(bodies(&out), expected);
        assert_eq!(acc.dropped_frames(), 1);
        assert!(acc.finish().is_none());
    }

    #[test]
    fn test_max_frame_len_enforced() {
        let frame = delta_frame("this frame is longer than the configured limit");
        let mut acc = FrameAccumulator::with_max_frame_len(32);
        let mut out = Vec::new();
        acc.feed_into(&frame, &mut out);
        assert!(matches!(
            out[0].as_ref().expect_err("dropped").error,
            FrameError::InvalidTotalLength(_)
        ));
    }

    #[test]
    fn test_finish_reports_partial_tail() {
        let frame = delta_frame("tail");
        let mut acc = FrameAccumulator::new();
        assert!(acc.feed(&frame[..20]).is_empty());
        let drop = acc.finish().expect("partial frame");
        assert_eq!(drop.discarded_bytes, 20);
        assert_eq!(
            drop.error,
            FrameError::LengthMismatch {
                declared: frame.len(),
                actual: 20
            }
        );
        assert!(acc.finish().is_none());
    }
}
