pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod stream;

pub use protocol::canonical::{FinishReason, NormalizedPart, Usage};
pub use stream::{gateway_sse_stream, part_stream, SessionOptions, StreamSession};
