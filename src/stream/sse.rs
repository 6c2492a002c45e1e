/// SSE record encoding for the gateway-compat output.
///
/// Records are unnamed `data:` events; the payload is written as received,
/// with no re-serialization.
use bytes::{BufMut, Bytes, BytesMut};

pub const DONE_FRAME: &str = "data: [DONE]\n\n";

const DATA_PREFIX: &[u8] = b"data: ";
const RECORD_END: &[u8] = b"\n\n";
const ERROR_PREFIX: &[u8] = br#"{"type":"error","error":"#;

/// Format a `data: <payload>\n\n` record.
#[must_use]
pub fn sse_data_frame(payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(DATA_PREFIX.len() + payload.len() + RECORD_END.len());
    out.put_slice(DATA_PREFIX);
    out.put_slice(payload);
    out.put_slice(RECORD_END);
    out.freeze()
}

/// Format an error envelope around a raw upstream body.
///
/// The body is spliced in verbatim, not re-parsed.
#[must_use]
pub fn error_sse_frame(raw_body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(
        DATA_PREFIX.len() + ERROR_PREFIX.len() + raw_body.len() + 1 + RECORD_END.len(),
    );
    out.put_slice(DATA_PREFIX);
    out.put_slice(ERROR_PREFIX);
    out.put_slice(raw_body);
    out.put_u8(b'}');
    out.put_slice(RECORD_END);
    out.freeze()
}

/// Check if a record is the terminal `[DONE]` sentinel.
#[must_use]
pub fn is_done_frame(record: &[u8]) -> bool {
    record == DONE_FRAME.as_bytes()
}
