use std::io;
use std::path::Path;

use bytes::{Bytes, BytesMut};
use clap::Parser;
use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use bedrock_stream::config::{load_config, AppConfig, StreamMode};
use bedrock_stream::observability::init_tracing;
use bedrock_stream::protocol::eventstream::FrameAccumulator;
use bedrock_stream::stream::{gateway_sse_stream_with, part_stream_with};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Parser, Debug)]
#[command(
    name = "bedrock-stream",
    about = "Decode a captured Bedrock event-stream response body",
    long_about = "Decode a captured Bedrock event-stream response body. Native mode prints \
one JSON part per line; gateway mode prints SSE records."
)]
struct Cli {
    /// Path to the YAML config file (defaults to config.yaml when present)
    #[arg(long = "config", value_name = "PATH")]
    config_path: Option<String>,

    /// Event shape of the captured body
    #[arg(long, value_enum)]
    mode: Option<StreamMode>,

    /// Size of each chunk handed to the decoder
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    chunk_size: Option<u64>,

    /// Capture file, or "-" for stdin
    input: Option<String>,
}

fn resolve_config(cli: &Cli) -> AppConfig {
    let mut config = match cli.config_path.as_deref() {
        Some(path) => load_config(path).unwrap_or_else(|e| {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            load_config(DEFAULT_CONFIG_PATH).unwrap_or_else(|e| {
                eprintln!("Failed to load configuration: {e}");
                eprintln!("Fix 'config.yaml' or compare it with 'config.example.yaml'.");
                std::process::exit(1);
            })
        }
        None => AppConfig::default(),
    };
    if let Some(mode) = cli.mode {
        config.replay.mode = mode;
    }
    if let Some(chunk_size) = cli.chunk_size {
        config.replay.chunk_size = usize::try_from(chunk_size).unwrap_or(usize::MAX);
    }
    if let Some(input) = &cli.input {
        config.replay.input.clone_from(input);
    }
    config
}

fn main() {
    let cli = Cli::parse();
    let config = resolve_config(&cli);

    init_tracing(&config.features.log_level, config.features.log_json);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    if let Err(err) = runtime.block_on(run(config)) {
        eprintln!("bedrock-stream: {err}");
        std::process::exit(1);
    }
}

async fn open_input(input: &str) -> io::Result<Box<dyn AsyncRead + Send + Unpin>> {
    if input == "-" {
        Ok(Box::new(tokio::io::stdin()))
    } else {
        Ok(Box::new(tokio::fs::File::open(input).await?))
    }
}

/// Read `reader` in chunks of at most `chunk_size` bytes.
fn chunked_reader(
    reader: Box<dyn AsyncRead + Send + Unpin>,
    chunk_size: usize,
) -> impl Stream<Item = io::Result<Bytes>> + Send {
    futures_util::stream::unfold(
        (reader, BytesMut::with_capacity(chunk_size), false),
        move |(mut reader, mut buf, done)| async move {
            if done {
                return None;
            }
            buf.clear();
            buf.reserve(chunk_size);
            let mut limited = (&mut reader).take(chunk_size as u64);
            match limited.read_buf(&mut buf).await {
                Ok(0) => None,
                Ok(_) => {
                    let chunk = buf.split().freeze();
                    Some((Ok(chunk), (reader, buf, false)))
                }
                Err(err) => Some((Err(err), (reader, buf, true))),
            }
        },
    )
}

async fn run(config: AppConfig) -> io::Result<()> {
    let reader = open_input(&config.replay.input).await?;
    let source = chunked_reader(reader, config.replay.chunk_size);
    let accumulator = FrameAccumulator::with_max_frame_len(config.decoder.max_frame_bytes);
    let mut stdout = tokio::io::stdout();

    tracing::info!(
        input = %config.replay.input,
        mode = %config.replay.mode,
        chunk_size = config.replay.chunk_size,
        "replaying event stream"
    );

    match config.replay.mode {
        StreamMode::Native => {
            let parts = part_stream_with(source, config.output.session_options(), accumulator);
            futures_util::pin_mut!(parts);
            let mut line = Vec::with_capacity(256);
            while let Some(part) = parts.next().await {
                line.clear();
                serde_json::to_writer(&mut line, &part).map_err(io::Error::other)?;
                line.push(b'\n');
                stdout.write_all(&line).await?;
            }
        }
        StreamMode::Gateway => {
            let records = gateway_sse_stream_with(source, accumulator);
            futures_util::pin_mut!(records);
            while let Some(record) = records.next().await {
                stdout.write_all(&record).await?;
            }
        }
    }
    stdout.flush().await
}
