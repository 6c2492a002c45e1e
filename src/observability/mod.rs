use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::protocol::canonical::{FinishReason, Usage};

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (TRACE, DEBUG, INFO, ERROR)
///
/// Logs are written to stderr; stdout carries the decoded stream.
pub fn init_tracing(log_level: &str, json: bool) {
    let level = log_level.to_uppercase();

    if level == "DISABLED" {
        return;
    }

    let tracing_level = match level.as_str() {
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    };

    let filter = EnvFilter::try_new(tracing_level).unwrap_or_else(|_| EnvFilter::new("INFO"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Log the outcome of a decoded stream.
pub fn log_stream_complete(
    finish_reason: FinishReason,
    usage: &Usage,
    events: u64,
    dropped_frames: u64,
    duration: Duration,
) {
    info!(
        finish_reason = finish_reason.as_str(),
        input_tokens = usage.input_tokens.total.unwrap_or(0),
        output_tokens = usage.output_tokens.total.unwrap_or(0),
        cache_read_tokens = usage.input_tokens.cache_read,
        cache_write_tokens = usage.input_tokens.cache_write,
        events,
        dropped_frames,
        duration_seconds = duration.as_secs_f64(),
        "stream completed"
    );
}
