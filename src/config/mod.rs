pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;

use self::validation::validate_config;
use crate::protocol::eventstream::MAX_FRAME_LEN;
use crate::stream::SessionOptions;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Which event shape the captured body carries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// ConverseStream events, decoded into normalized parts.
    #[default]
    Native,
    /// Anthropic-over-gateway chunks, relayed as SSE.
    Gateway,
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamMode::Native => write!(f, "native"),
            StreamMode::Gateway => write!(f, "gateway"),
        }
    }
}

impl std::str::FromStr for StreamMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(StreamMode::Native),
            "gateway" => Ok(StreamMode::Gateway),
            other => Err(ConfigError::Validation(format!(
                "mode must be native or gateway, got {other:?}"
            ))),
        }
    }
}

/// Where the replay reads its captured body from and how it slices it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// File path, or `-` for stdin.
    #[serde(default = "default_input")]
    pub input: String,
    #[serde(default)]
    pub mode: StreamMode,
    /// Size of each chunk handed to the decoder.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_input() -> String {
    "-".to_string()
}
fn default_chunk_size() -> usize {
    4096
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            input: default_input(),
            mode: StreamMode::default(),
            chunk_size: default_chunk_size(),
        }
    }
}

/// Frame decoder limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_max_frame_bytes() -> usize {
    MAX_FRAME_LEN
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// Output shaping for the native mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub include_raw_chunks: bool,
    #[serde(default)]
    pub report_dropped_frames: bool,
}

impl OutputConfig {
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            warnings: Vec::new(),
            include_raw_chunks: self.include_raw_chunks,
            report_dropped_frames: self.report_dropped_frames,
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit logs as JSON lines instead of human-readable text.
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] or [`ConfigError::Validation`].
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}
