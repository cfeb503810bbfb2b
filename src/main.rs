//! stream2http - deliver a stream of JSON records to an HTTP endpoint
//!
//! Reads newline-delimited JSON records from a file or standard input and delivers
//! them through the batching HTTP sink. Sink behaviour is configured with `key=value`
//! options, see `--option` and `--options-file`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use stream2http::telemetry::{self, LogFormat};
use stream2http::{
    CallbackRegistry, ConnectorOptions, HttpSinkWriter, Record, ReqwestTransport, SinkConfig,
};

/// Pause before offering a record again while the sink is saturated
const BACKPRESSURE_PAUSE: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(
    name = "stream2http",
    about = "Deliver newline-delimited JSON records to an HTTP endpoint in batches",
    version
)]
struct Args {
    /// Sink option as key=value, may be repeated
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
    options: Vec<String>,

    /// File with one key=value option per line
    #[arg(long)]
    options_file: Option<PathBuf>,

    /// Input file with one JSON record per line, standard input when omitted
    #[arg(long)]
    input: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Jaeger agent address (host:port) for span export
    #[arg(long)]
    jaeger_agent: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init(args.log_format, args.jaeger_agent.as_deref())?;

    let result = run(args).await;
    if let Err(e) = &result {
        error!("stream2http failed: {:#}", e);
    }
    telemetry::shutdown();
    result
}

fn load_options(args: &Args) -> Result<ConnectorOptions> {
    let mut options = match &args.options_file {
        Some(path) => ConnectorOptions::from_file(path)?,
        None => ConnectorOptions::new(),
    };
    for pair in &args.options {
        options.insert_pair(pair)?;
    }
    options.apply_env_overrides();
    Ok(options)
}

async fn run(args: Args) -> Result<()> {
    let options = load_options(&args)?;
    let config = SinkConfig::from_options(&options)?;
    info!(
        "Delivering to {} {} ({:?} format, {:?} mode, max in-flight {})",
        config.method, config.url, config.format, config.request_mode, config.max_in_flight
    );

    let callback = CallbackRegistry::with_builtins().create(&config.callback)?;
    let transport = Arc::new(ReqwestTransport::new()?);
    let writer = HttpSinkWriter::new(&config, transport, callback)?;

    let pumped = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open input {}", path.display()))?;
            pump_until_interrupted(&writer, BufReader::new(file)).await
        }
        None => pump_until_interrupted(&writer, BufReader::new(tokio::io::stdin())).await,
    };

    let stats = writer.close().await?;
    info!(
        "Done: {} records delivered, {} failed",
        stats.records_delivered, stats.records_failed
    );
    pumped
}

async fn pump_until_interrupted<R>(writer: &HttpSinkWriter, reader: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    tokio::select! {
        result = pump(writer, reader) => {
            let count = result?;
            info!("Input exhausted after {} records", count);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, flushing accepted records");
        }
    }
    Ok(())
}

async fn pump<R>(writer: &HttpSinkWriter, reader: R) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut count = 0u64;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let record = match Record::from_json_line(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping input line: {}", e);
                continue;
            }
        };

        loop {
            match writer.write(record.clone()).await {
                Ok(()) => break,
                Err(e) if e.is_transient() => tokio::time::sleep(BACKPRESSURE_PAUSE).await,
                Err(e) => return Err(e.into()),
            }
        }
        count += 1;
    }
    Ok(count)
}
