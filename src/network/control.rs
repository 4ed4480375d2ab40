//! TCP control channel
//!
//! Owns the TCP connection: connects with a timeout, runs the
//! GET_FORMAT / START_PLAY handshake and then services heartbeats until the
//! connection fails or the session is cancelled.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, trace, warn};

use crate::codec::ControlCodec;
use crate::config::{NetworkConfig, UnexpectedCommandPolicy};
use crate::error::{NetworkError, Result};
use crate::protocol::{AudioFormat, Command, ServerFrame, StreamId};
use crate::session::heartbeat::HeartbeatClock;
use crate::session::stats::SessionStats;

/// Client end of the control connection
pub struct ControlChannel {
    reader: FramedRead<OwnedReadHalf, ControlCodec>,
    writer: FramedWrite<OwnedWriteHalf, ControlCodec>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    handshake_timeout: Duration,
}

impl ControlChannel {
    /// Resolve `host` and connect, giving up after the configured timeout
    pub async fn connect(host: &str, port: u16, config: &NetworkConfig) -> Result<Self> {
        let target = format!("{host}:{port}");
        let connect_timeout = config.connect_timeout();

        let stream = timeout(connect_timeout, connect_any(host, port))
            .await
            .map_err(|_| NetworkError::ConnectTimeout(target.clone(), connect_timeout))??;

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }

        let local_addr = stream.local_addr().map_err(NetworkError::from)?;
        let peer_addr = stream.peer_addr().map_err(NetworkError::from)?;
        info!("TCP connected {} -> {}", local_addr, peer_addr);

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: FramedRead::new(read_half, ControlCodec),
            writer: FramedWrite::new(write_half, ControlCodec),
            local_addr,
            peer_addr,
            handshake_timeout: config.handshake_timeout(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Send one command and flush it
    pub async fn send(&mut self, command: Command) -> Result<()> {
        trace!("send {}", command);
        self.writer.send(command).await
    }

    /// Next complete frame from the server
    pub async fn next_frame(&mut self) -> Result<ServerFrame> {
        match self.reader.next().await {
            Some(frame) => frame,
            None => Err(NetworkError::ConnectionClosed.into()),
        }
    }

    async fn handshake_reply(&mut self, step: &'static str) -> Result<ServerFrame> {
        timeout(self.handshake_timeout, self.next_frame())
            .await
            .map_err(|_| NetworkError::HandshakeTimeout(step))?
    }

    /// GET_FORMAT exchange
    pub async fn request_format(&mut self) -> Result<AudioFormat> {
        self.send(Command::GetFormat).await?;
        match self.handshake_reply("GET_FORMAT").await? {
            ServerFrame::Format(format) => {
                info!("Received audio format: {}", format);
                Ok(format)
            }
            other => Err(NetworkError::ProtocolViolation(format!(
                "expected GET_FORMAT reply, got {}",
                other.command()
            ))
            .into()),
        }
    }

    /// START_PLAY exchange; the server must answer with a positive id
    pub async fn start_play(&mut self) -> Result<StreamId> {
        self.send(Command::StartPlay).await?;
        match self.handshake_reply("START_PLAY").await? {
            ServerFrame::StreamStarted(id) => {
                let id = StreamId::new(id)?;
                info!("Stream id {}", id);
                Ok(id)
            }
            other => Err(NetworkError::ProtocolViolation(format!(
                "expected START_PLAY reply, got {}",
                other.command()
            ))
            .into()),
        }
    }

    /// Steady-state command loop. Echoes every HEARTBEAT; with
    /// `heartbeat_ping` set it pings on its own schedule and does not echo.
    /// Only returns on failure.
    pub async fn run_command_loop(
        &mut self,
        clock: &HeartbeatClock,
        stats: &SessionStats,
        config: &NetworkConfig,
    ) -> Result<()> {
        let period = config.heartbeat_interval();
        let mut ping = interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = self.reader.next() => {
                    let frame = match frame {
                        Some(frame) => frame?,
                        None => return Err(NetworkError::ConnectionClosed.into()),
                    };
                    match frame {
                        ServerFrame::Heartbeat => {
                            trace!("receive heartbeat");
                            clock.beat();
                            stats.record_heartbeat();
                            if !config.heartbeat_ping {
                                self.writer.send(Command::Heartbeat).await?;
                            }
                        }
                        other => match config.unexpected_command {
                            UnexpectedCommandPolicy::Fail => {
                                return Err(NetworkError::ProtocolViolation(format!(
                                    "unexpected {} while streaming",
                                    other.command()
                                ))
                                .into());
                            }
                            UnexpectedCommandPolicy::Ignore => {
                                warn!("Ignoring {} while streaming", other.command());
                            }
                        },
                    }
                }
                _ = ping.tick(), if config.heartbeat_ping => {
                    trace!("send heartbeat ping");
                    self.writer.send(Command::Heartbeat).await?;
                }
            }
        }
    }
}

/// Try every resolved address in turn
async fn connect_any(host: &str, port: u16) -> std::result::Result<TcpStream, NetworkError> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|e| NetworkError::Unresolved(format!("{host}: {e}")))?
        .collect();

    let mut last_err = None;
    for addr in addrs {
        debug!("connecting to {}", addr);
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }

    Err(match last_err {
        Some(e) => NetworkError::Io(e),
        None => NetworkError::Unresolved(host.to_string()),
    })
}
