//! # Audio Share Client
//!
//! Client engine for receiving live PCM audio from an audio-share server.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          AUDIO SHARE SERVER                          │
//! │     TCP control (GET_FORMAT, START_PLAY, HEARTBEAT) + UDP PCM        │
//! └───────────────┬───────────────────────────────────▲──────────┬───────┘
//!                 │ TCP                               │ UDP      │ UDP
//!                 ▼                                   │ stream id│ PCM
//! ┌───────────────────────────────────────────────────┼──────────┼───────┐
//! │                             CLIENT                │          ▼       │
//! │  ┌──────────────────────────┐        ┌────────────┴──────────────┐   │
//! │  │ Control Channel          │        │ Data Channel              │   │
//! │  │ (network::control)       │        │ (network::data)           │   │
//! │  │  codec::ControlCodec     │        │  one datagram = one chunk │   │
//! │  └────────────┬─────────────┘        └────────────┬──────────────┘   │
//! │               │                                   │                  │
//! │               ▼                                   ▼                  │
//! │  ┌────────────────────────────────────────────────────────────────┐  │
//! │  │ Session Orchestrator (session::orchestrator)                   │  │
//! │  │  Idle → Connecting → AwaitingFormat → AwaitingStreamId →       │  │
//! │  │  Streaming → Stopped | Failed       heartbeat watchdog, stats  │  │
//! │  └───────────────────────────────┬────────────────────────────────┘  │
//! │                                  ▼                                   │
//! │  ┌────────────────────────────────────────────────────────────────┐  │
//! │  │ AudioSink (sink): format barrier, PCM chunks, errors, logs     │  │
//! │  └────────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use audio_share_client::config::NetworkConfig;
//! use audio_share_client::session::SessionOrchestrator;
//! use audio_share_client::sink::ChannelSink;
//!
//! # async fn run() -> audio_share_client::Result<()> {
//! let (sink, mut events) = ChannelSink::new();
//! let mut orchestrator = SessionOrchestrator::new(NetworkConfig::default(), Arc::new(sink));
//! orchestrator.start("192.168.3.2", 65530)?;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! orchestrator.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod mock_server;
pub mod network;
pub mod protocol;
pub mod session;
pub mod sink;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default server address
    pub const DEFAULT_HOST: &str = "192.168.3.2";

    /// Default control (and data) port
    pub const DEFAULT_PORT: u16 = 65530;

    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;

    /// Bound on each handshake reply
    pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5000;

    /// Watchdog check period
    pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 3000;

    /// Silence after which the session is declared dead
    pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 5000;

    /// SO_RCVBUF hint for the data socket
    pub const DEFAULT_RECEIVE_BUFFER_BYTES: usize = 1024 * 1024;

    /// Largest possible UDP payload
    pub const MAX_DATAGRAM_SIZE: usize = 65535;

    /// Lock-free ring buffer capacity (in datagrams)
    pub const RING_BUFFER_CAPACITY: usize = 256;

    /// Caller-side backoff before reconnecting
    pub const DEFAULT_RETRY_DELAY_MS: u64 = 3000;
}
