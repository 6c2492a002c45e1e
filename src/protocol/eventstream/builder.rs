use aws_smithy_eventstream::frame::write_message_to;
use bytes::{Bytes, BytesMut};

use super::{Header, HeaderValue, Message, MessageClass, CONTENT_TYPE_HEADER, MESSAGE_TYPE_HEADER};
use crate::error::FrameError;

/// Write one message in wire form.
///
/// # Errors
///
/// Returns [`FrameError::Encode`] when a header or the payload exceeds the
/// wire limits.
pub fn encode_message(message: &Message) -> Result<Bytes, FrameError> {
    let mut out = BytesMut::new();
    write_message_to(message, &mut out).map_err(|e| FrameError::Encode(e.to_string()))?;
    Ok(out.freeze())
}

/// Builder for frames in the shapes the service sends.
///
/// Used by the replay fixtures, tests and benches to produce wire bytes.
#[derive(Debug, Clone, Default)]
pub struct FrameBuilder {
    headers: Vec<Header>,
    body: Bytes,
}

impl FrameBuilder {
    /// A frame with no headers at all.
    #[must_use]
    pub fn raw() -> Self {
        Self::default()
    }

    /// `:message-type: event` with the given `:event-type`.
    #[must_use]
    pub fn event(event_type: &str) -> Self {
        Self::with_class(MessageClass::Event, event_type)
    }

    /// `:message-type: exception` with the given `:exception-type`.
    #[must_use]
    pub fn exception(exception_type: &str) -> Self {
        Self::with_class(MessageClass::Exception, exception_type)
    }

    /// `:message-type: error` with the given `:error-code`.
    #[must_use]
    pub fn error(error_code: &str) -> Self {
        Self::with_class(MessageClass::Error, error_code)
    }

    fn with_class(class: MessageClass, sub_type: &str) -> Self {
        Self::raw()
            .string_header(MESSAGE_TYPE_HEADER, class.as_str())
            .string_header(class.sub_type_header(), sub_type)
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: HeaderValue) -> Self {
        self.headers.push(Header::new(name.to_owned(), value));
        self
    }

    #[must_use]
    pub fn string_header(self, name: &str, value: &str) -> Self {
        self.header(name, HeaderValue::String(value.to_owned().into()))
    }

    /// Set the body and mark it `application/json`.
    #[must_use]
    pub fn json(self, body: impl Into<Bytes>) -> Self {
        self.string_header(CONTENT_TYPE_HEADER, "application/json")
            .body(body)
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn build(&self) -> Message {
        Message::new_from_parts(self.headers.clone(), self.body.clone())
    }

    /// Wire bytes of the built message.
    ///
    /// # Errors
    ///
    /// See [`encode_message`].
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        encode_message(&self.build())
    }
}
