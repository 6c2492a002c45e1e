use aws_smithy_eventstream::frame::read_message_from;

use super::{Frame, MAX_FRAME_LEN, MIN_FRAME_LEN};
use crate::error::FrameError;

#[inline]
pub(crate) fn read_u32_be(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_be_bytes(buf)
}

/// Decode one complete frame.
///
/// `bytes` must hold exactly the number of bytes declared by its length
/// prefix. Checksums and headers are verified by the smithy wire decoder.
///
/// # Errors
///
/// Returns a [`FrameError`] on any length, checksum or header failure, or
/// when the `:message-type` header is missing or unknown.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, FrameError> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(FrameError::TooShort { len: bytes.len() });
    }
    let declared = read_u32_be(bytes, 0) as usize;
    if declared > MAX_FRAME_LEN {
        return Err(FrameError::InvalidTotalLength(declared));
    }
    if declared != bytes.len() {
        return Err(FrameError::LengthMismatch {
            declared,
            actual: bytes.len(),
        });
    }

    let message = read_message_from(bytes).map_err(|e| FrameError::Malformed(e.to_string()))?;
    Frame::try_from(message)
}
