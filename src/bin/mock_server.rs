//! Mock audio-share server serving a sine tone, for trying the receiver
//! without real hardware.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audio_share_client::{
    mock_server::{segment_pcm, sine_wave, HeartbeatMode, MockAudioServer, MockServerConfig},
    protocol::{AudioFormat, Encoding},
};

#[derive(Parser, Debug)]
#[command(name = "mock_server")]
#[command(about = "Mock audio-share server that streams a sine tone")]
struct Args {
    /// Address to bind TCP and UDP to
    #[arg(short, long, default_value = "127.0.0.1:65530")]
    address: String,

    #[arg(long, default_value_t = 48000)]
    sample_rate: u32,

    #[arg(long, default_value_t = 2)]
    channels: u32,

    /// float, pcm8, pcm16, pcm24 or pcm32
    #[arg(long, default_value = "float", value_parser = parse_encoding)]
    encoding: Encoding,

    /// Tone frequency in Hz
    #[arg(long, default_value_t = 440.0)]
    frequency: f32,

    #[arg(long, default_value_t = 1)]
    stream_id: i32,

    /// Heartbeat period in milliseconds, 0 to stay silent
    #[arg(long, default_value_t = 3000)]
    heartbeat_ms: u64,
}

fn parse_encoding(value: &str) -> Result<Encoding> {
    match value.to_ascii_lowercase().as_str() {
        "float" | "f32" => Ok(Encoding::PcmFloat),
        "pcm8" | "8" => Ok(Encoding::Pcm8),
        "pcm16" | "16" => Ok(Encoding::Pcm16),
        "pcm24" | "24" => Ok(Encoding::Pcm24),
        "pcm32" | "32" => Ok(Encoding::Pcm32),
        other => Err(anyhow!("unknown encoding '{other}'")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!("Starting mock server with args: {:?}", args);

    let format = AudioFormat::new(args.sample_rate, args.channels, args.encoding);
    if format.bytes_per_second() == 0 {
        return Err(anyhow!("invalid format {}", format));
    }

    // One second of tone, looped, paced at real time
    let pcm = sine_wave(&format, args.frequency, args.sample_rate as usize);
    let audio = segment_pcm(&pcm, format.block_align());
    let segment_bytes = audio.first().map(|s| s.len()).unwrap_or(1);
    let packet_interval =
        Duration::from_secs_f64(segment_bytes as f64 / format.bytes_per_second() as f64);

    let heartbeat = match args.heartbeat_ms {
        0 => HeartbeatMode::Silent,
        ms => HeartbeatMode::Send(Duration::from_millis(ms)),
    };

    let mut server = MockAudioServer::start(MockServerConfig {
        bind_address: args.address,
        format,
        stream_id: args.stream_id,
        heartbeat,
        audio,
        packet_interval,
        loop_audio: true,
        ..MockServerConfig::default()
    })
    .await?;
    tracing::info!("Mock server listening on {}", server.addr());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = server.next_event(Duration::from_secs(1)) => {
                if let Some(event) = event {
                    tracing::info!("{:?}", event);
                }
            }
        }
    }

    server.shutdown();
    tracing::info!("Mock server stopped");
    Ok(())
}
