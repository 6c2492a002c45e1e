//! AWS event-stream binary framing (`application/vnd.amazon.eventstream`).
//!
//! Wire layout of one frame:
//!
//! ```text
//! [total_len u32][headers_len u32][prelude_crc u32][headers ...][payload ...][message_crc u32]
//! ```
//!
//! All integers are big-endian. The prelude CRC covers the first 8 bytes, the
//! message CRC covers everything before the trailing 4 bytes.
pub mod accumulator;
pub mod builder;
pub mod decoder;

pub use accumulator::{FrameAccumulator, FrameDrop};
pub use aws_smithy_types::event_stream::{Header, HeaderValue, Message};
pub use builder::{encode_message, FrameBuilder};
pub use decoder::decode_frame;

use bytes::Bytes;

use crate::error::FrameError;

/// Length of the `total_len` + `headers_len` + `prelude_crc` prelude.
pub const PRELUDE_LEN: usize = 12;
/// Smallest possible frame: prelude plus trailing message CRC.
pub const MIN_FRAME_LEN: usize = PRELUDE_LEN + 4;
/// Largest frame the service will ever send (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

pub const MESSAGE_TYPE_HEADER: &str = ":message-type";
pub const EVENT_TYPE_HEADER: &str = ":event-type";
pub const EXCEPTION_TYPE_HEADER: &str = ":exception-type";
pub const ERROR_CODE_HEADER: &str = ":error-code";
pub const CONTENT_TYPE_HEADER: &str = ":content-type";

/// The `:message-type` header of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageClass {
    Event,
    Exception,
    Error,
}

impl MessageClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MessageClass::Event => "event",
            MessageClass::Exception => "exception",
            MessageClass::Error => "error",
        }
    }

    #[must_use]
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "event" => Some(MessageClass::Event),
            "exception" => Some(MessageClass::Exception),
            "error" => Some(MessageClass::Error),
            _ => None,
        }
    }

    /// Header key that carries the sub-type tag for this class.
    #[must_use]
    pub fn sub_type_header(self) -> &'static str {
        match self {
            MessageClass::Event => EVENT_TYPE_HEADER,
            MessageClass::Exception => EXCEPTION_TYPE_HEADER,
            MessageClass::Error => ERROR_CODE_HEADER,
        }
    }
}

/// One decoded frame. The body is not interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub message_class: MessageClass,
    pub sub_type: String,
    pub content_type: Option<String>,
    pub headers: Vec<Header>,
    pub body: Bytes,
}

impl Frame {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        find_header(&self.headers, name)
    }

    /// Value of a string-typed header.
    #[must_use]
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.header(name)
            .and_then(|value| value.as_string().ok())
            .map(|value| value.as_str())
    }

    /// Body as UTF-8 text, replacing invalid sequences.
    #[must_use]
    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

impl TryFrom<Message> for Frame {
    type Error = FrameError;

    /// Classify a checksum-verified message by its `:message-type` header.
    fn try_from(message: Message) -> Result<Self, Self::Error> {
        let headers = message.headers();
        let message_type = find_string(headers, MESSAGE_TYPE_HEADER)
            .ok_or(FrameError::MissingHeader(MESSAGE_TYPE_HEADER))?;
        let message_class = MessageClass::from_wire(message_type)
            .ok_or_else(|| FrameError::UnknownMessageType(message_type.to_owned()))?;
        let sub_type_header = message_class.sub_type_header();
        let sub_type = find_string(headers, sub_type_header)
            .ok_or(FrameError::MissingHeader(sub_type_header))?
            .to_owned();
        let content_type = find_string(headers, CONTENT_TYPE_HEADER).map(str::to_owned);

        Ok(Frame {
            message_class,
            sub_type,
            content_type,
            headers: headers.to_vec(),
            body: message.payload().clone(),
        })
    }
}

fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a HeaderValue> {
    headers
        .iter()
        .find(|header| header.name().as_str() == name)
        .map(Header::value)
}

fn find_string<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    find_header(headers, name)
        .and_then(|value| value.as_string().ok())
        .map(|value| value.as_str())
}
