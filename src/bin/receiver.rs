//! Audio Receiver Application
//!
//! Connects to an audio-share server and writes the received PCM stream to a
//! file or stdout, reconnecting after failures.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audio_share_client::{
    config::ClientConfig,
    error::{Error, FailureKind, SinkError},
    protocol::AudioFormat,
    session::SessionOrchestrator,
    sink::{AudioSink, PcmWriterSink},
};

#[derive(Parser, Debug)]
#[command(name = "receiver")]
#[command(about = "Receive a live PCM stream from an audio-share server")]
struct Args {
    /// Server host (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Configuration file; defaults to the platform config directory
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where to write raw PCM, "-" for stdout
    #[arg(short, long, default_value = "-")]
    output: String,

    /// Exit on the first failure instead of reconnecting
    #[arg(long)]
    no_retry: bool,
}

/// PCM writer that also reports failures to the retry loop
struct ReceiverSink {
    writer: PcmWriterSink,
    failures: mpsc::UnboundedSender<FailureKind>,
}

#[async_trait]
impl AudioSink for ReceiverSink {
    async fn on_format_ready(&self, format: &AudioFormat) -> Result<(), SinkError> {
        self.writer.on_format_ready(format).await
    }

    fn on_playback_started(&self) {
        self.writer.on_playback_started();
    }

    fn on_audio_data(&self, data: Bytes) {
        self.writer.on_audio_data(data);
    }

    fn on_error(&self, message: &str, cause: &Error) {
        self.writer.on_error(message, cause);
        let _ = self.failures.send(cause.kind());
    }

    fn on_log(&self, message: &str) {
        self.writer.on_log(message);
    }
}

/// Sleep for `delay`, logging the remaining seconds
async fn countdown(delay: Duration) {
    let mut remaining = delay;
    while !remaining.is_zero() {
        tracing::info!("Reconnecting in {}s", remaining.as_secs_f32().ceil() as u64);
        let step = remaining.min(Duration::from_secs(1));
        tokio::time::sleep(step).await;
        remaining -= step;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; stdout may carry PCM
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ClientConfig::load_default()?,
    };
    if let Some(host) = args.host {
        config.network.host = host;
    }
    if let Some(port) = args.port {
        config.network.port = port;
    }
    if args.no_retry {
        config.retry.enabled = false;
    }
    config.network.validate()?;

    let output: Box<dyn Write + Send> = if args.output == "-" {
        Box::new(io::stdout())
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("creating {}", args.output))?;
        Box::new(BufWriter::new(file))
    };

    let (failures_tx, mut failures) = mpsc::unbounded_channel();
    let sink = Arc::new(ReceiverSink {
        writer: PcmWriterSink::spawn(output, &config.sink)?,
        failures: failures_tx,
    });

    tracing::info!(
        "Starting audio receiver for {}:{}",
        config.network.host,
        config.network.port
    );

    let mut orchestrator = SessionOrchestrator::new(config.network.clone(), sink.clone());
    orchestrator.start(&config.network.host, config.network.port)?;

    let mut outcome = Ok(());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down");
                break;
            }
            failure = failures.recv() => {
                let Some(kind) = failure else { break };
                if !config.retry.enabled {
                    outcome = Err(kind);
                    break;
                }

                tracing::warn!("Session ended with {:?}", kind);
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Received Ctrl+C, shutting down");
                        break;
                    }
                    _ = countdown(config.retry.delay()) => {}
                }

                let Some((host, port)) = orchestrator.last_target() else { break };
                orchestrator.start(&host, port)?;
            }
        }
    }

    orchestrator.stop().await;
    if let Some(stats) = orchestrator.stats() {
        tracing::info!("Session stats: {}", serde_json::to_string(&stats)?);
    }
    drop(orchestrator);

    // The orchestrator held the only other handle; stop the writer so the
    // totals include everything it drained
    match Arc::try_unwrap(sink) {
        Ok(sink) => {
            let summary = sink.writer.finish();
            tracing::info!(
                "Wrote {} bytes of PCM ({} chunks dropped, {} underruns)",
                summary.bytes_written,
                summary.dropped_chunks,
                summary.underruns
            );
        }
        Err(sink) => tracing::warn!(
            "PCM writer still shared, wrote at least {} bytes ({} chunks dropped)",
            sink.writer.bytes_written(),
            sink.writer.dropped_chunks()
        ),
    }

    if let Err(kind) = outcome {
        bail!("session failed: {:?}", kind);
    }
    Ok(())
}
