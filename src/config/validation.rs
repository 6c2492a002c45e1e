use super::{AppConfig, ConfigError};
use crate::protocol::eventstream::{MAX_FRAME_LEN, MIN_FRAME_LEN};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_replay_config(config)?;
    validate_decoder_config(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_replay_config(config: &AppConfig) -> Result<(), ConfigError> {
    let replay = &config.replay;
    if replay.input.trim().is_empty() {
        return Err(validation_err(
            "replay.input cannot be empty (use \"-\" for stdin)",
        ));
    }
    if replay.chunk_size == 0 {
        return Err(validation_err("replay.chunk_size must be greater than 0"));
    }
    Ok(())
}

fn validate_decoder_config(config: &AppConfig) -> Result<(), ConfigError> {
    let max = config.decoder.max_frame_bytes;
    if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&max) {
        return Err(validation_err(format!(
            "decoder.max_frame_bytes must be between {MIN_FRAME_LEN} and {MAX_FRAME_LEN}"
        )));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = [
        "TRACE", "DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED",
    ];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}
