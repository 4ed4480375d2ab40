//! Loopback audio-share server for tests and local demos
//!
//! Speaks the server side of the protocol: answers GET_FORMAT and
//! START_PLAY, sends heartbeats, accepts the UDP registration datagram and
//! then streams PCM segments to the registered address. Every reply can be
//! overridden to exercise client failure paths.

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{decode_i32, encode_server_frame, ServerCodec};
use crate::protocol::{AudioFormat, Command, Encoding, ServerFrame};

/// UDP payload ceiling: PPPoE MTU minus IP and UDP headers
pub const MAX_SEGMENT_SIZE: usize = 1492 - 28;

/// How the server answers one handshake command
#[derive(Debug, Clone)]
pub enum Reply {
    /// The protocol-correct answer built from the server config
    Default,
    /// A specific frame instead
    Frame(ServerFrame),
    /// Raw bytes written as-is
    Raw(Bytes),
    /// Say nothing
    Never,
}

/// Server-side heartbeat behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatMode {
    /// Send HEARTBEAT on this period once the stream has started
    Send(Duration),
    /// Never send or answer heartbeats
    Silent,
    /// Only answer client HEARTBEATs
    ReplyOnly,
}

/// Configuration for the mock server
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    /// Use "127.0.0.1:0" for a random port
    pub bind_address: String,
    pub format: AudioFormat,
    pub stream_id: i32,
    pub format_reply: Reply,
    pub start_reply: Reply,
    pub heartbeat: HeartbeatMode,
    /// Write every control frame one byte at a time
    pub fragment_writes: bool,
    /// Frame sent on the control channel right after START_PLAY is answered
    pub unexpected_after_start: Option<ServerFrame>,
    /// Datagrams streamed to the client after registration, in order
    pub audio: Vec<Bytes>,
    pub packet_interval: Duration,
    pub loop_audio: bool,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        let format = AudioFormat::new(48000, 2, Encoding::PcmFloat);
        Self {
            bind_address: "127.0.0.1:0".to_string(),
            format,
            stream_id: 42,
            format_reply: Reply::Default,
            start_reply: Reply::Default,
            heartbeat: HeartbeatMode::Send(Duration::from_secs(3)),
            fragment_writes: false,
            unexpected_after_start: None,
            audio: segment_pcm(&sine_wave(&format, 440.0, 4800), format.block_align()),
            packet_interval: Duration::from_millis(10),
            loop_audio: false,
        }
    }
}

/// What the server observed, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Accepted(SocketAddr),
    Command(Command),
    UdpRegistered { stream_id: i32, addr: SocketAddr },
    Disconnected,
}

type StreamRegistry = Arc<Mutex<HashMap<i32, CancellationToken>>>;

struct Shared {
    config: MockServerConfig,
    udp: UdpSocket,
    streams: StreamRegistry,
    events: mpsc::UnboundedSender<ServerEvent>,
    shutdown: CancellationToken,
}

impl Shared {
    fn emit(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }
}

/// Running mock server; stops when dropped
pub struct MockAudioServer {
    addr: SocketAddr,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    shutdown: CancellationToken,
}

impl MockAudioServer {
    /// Bind TCP and UDP on the same port and start serving
    pub async fn start(config: MockServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(&config.bind_address).await?;
        let addr = listener.local_addr()?;
        let udp = UdpSocket::bind(addr).await?;
        info!("Mock audio server listening on {} ({})", addr, config.format);

        let (events_tx, events) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let shared = Arc::new(Shared {
            config,
            udp,
            streams: Arc::new(Mutex::new(HashMap::new())),
            events: events_tx,
            shutdown: shutdown.clone(),
        });

        tokio::spawn(accept_loop(listener, shared.clone()));
        tokio::spawn(udp_loop(shared));

        Ok(Self {
            addr,
            events,
            shutdown,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Next observed event, or `None` after `timeout`
    pub async fn next_event(&mut self, timeout: Duration) -> Option<ServerEvent> {
        tokio::time::timeout(timeout, self.events.recv())
            .await
            .ok()
            .flatten()
    }

    /// Skip events until one matches `pred`
    pub async fn wait_for<F>(&mut self, timeout: Duration, mut pred: F) -> Option<ServerEvent>
    where
        F: FnMut(&ServerEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let event = tokio::time::timeout_at(deadline, self.events.recv())
                .await
                .ok()
                .flatten()?;
            if pred(&event) {
                return Some(event);
            }
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for MockAudioServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(handle_client(stream, peer, shared.clone()));
                }
                Err(e) => {
                    warn!("accept failed: {}", e);
                }
            }
        }
    }
    debug!("mock server accept loop stopped");
}

async fn handle_client(stream: TcpStream, peer: SocketAddr, shared: Arc<Shared>) {
    info!("Client {} connected", peer);
    shared.emit(ServerEvent::Accepted(peer));

    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, ServerCodec);
    let writer = Arc::new(tokio::sync::Mutex::new(write_half));
    let session = shared.shutdown.child_token();
    let config = &shared.config;

    loop {
        let command = tokio::select! {
            _ = session.cancelled() => break,
            next = reader.next() => match next {
                Some(Ok(command)) => command,
                Some(Err(e)) => {
                    warn!("Client {} sent a bad frame: {}", peer, e);
                    break;
                }
                None => break,
            },
        };
        shared.emit(ServerEvent::Command(command));

        let result = match command {
            Command::GetFormat => {
                let default = ServerFrame::Format(config.format);
                send_reply(&writer, &config.format_reply, default, config.fragment_writes).await
            }
            Command::StartPlay => {
                let default = ServerFrame::StreamStarted(config.stream_id);
                // Registered before the reply so the client's datagram is never early
                let stream_id = started_stream(&config.start_reply, &default);
                if let Some(id) = stream_id {
                    shared.streams.lock().insert(id, session.clone());
                }
                let sent =
                    send_reply(&writer, &config.start_reply, default, config.fragment_writes).await;
                if let (Ok(()), Some(_), HeartbeatMode::Send(period)) =
                    (&sent, stream_id, config.heartbeat)
                {
                    tokio::spawn(heartbeat_loop(
                        writer.clone(),
                        period,
                        config.fragment_writes,
                        session.clone(),
                    ));
                }
                match (sent, &config.unexpected_after_start) {
                    (Ok(()), Some(frame)) => {
                        write_frame(&writer, frame, config.fragment_writes).await
                    }
                    (sent, _) => sent,
                }
            }
            Command::Heartbeat => match config.heartbeat {
                HeartbeatMode::ReplyOnly => {
                    write_frame(&writer, &ServerFrame::Heartbeat, config.fragment_writes).await
                }
                _ => Ok(()),
            },
            Command::None => {
                warn!("Client {} sent {}, closing", peer, command);
                break;
            }
        };

        if let Err(e) = result {
            debug!("Client {} write failed: {}", peer, e);
            break;
        }
    }

    session.cancel();
    shared
        .streams
        .lock()
        .retain(|_, token| !token.is_cancelled());
    info!("Client {} disconnected", peer);
    shared.emit(ServerEvent::Disconnected);
}

/// Stream id carried by a START_PLAY reply, if it carries one
fn started_stream(reply: &Reply, default: &ServerFrame) -> Option<i32> {
    match reply {
        Reply::Default => match default {
            ServerFrame::StreamStarted(id) => Some(*id),
            _ => None,
        },
        Reply::Frame(ServerFrame::StreamStarted(id)) => Some(*id),
        _ => None,
    }
}

async fn send_reply(
    writer: &tokio::sync::Mutex<OwnedWriteHalf>,
    reply: &Reply,
    default: ServerFrame,
    fragment: bool,
) -> io::Result<()> {
    match reply {
        Reply::Default => write_frame(writer, &default, fragment).await,
        Reply::Frame(frame) => write_frame(writer, frame, fragment).await,
        Reply::Raw(bytes) => write_bytes(writer, bytes, fragment).await,
        Reply::Never => Ok(()),
    }
}

async fn write_frame(
    writer: &tokio::sync::Mutex<OwnedWriteHalf>,
    frame: &ServerFrame,
    fragment: bool,
) -> io::Result<()> {
    let mut buf = BytesMut::new();
    encode_server_frame(frame, &mut buf);
    write_bytes(writer, &buf, fragment).await
}

async fn write_bytes(
    writer: &tokio::sync::Mutex<OwnedWriteHalf>,
    bytes: &[u8],
    fragment: bool,
) -> io::Result<()> {
    let mut writer = writer.lock().await;
    if fragment {
        for byte in bytes {
            writer.write_all(std::slice::from_ref(byte)).await?;
            writer.flush().await?;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        Ok(())
    } else {
        writer.write_all(bytes).await
    }
}

async fn heartbeat_loop(
    writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    period: Duration,
    fragment: bool,
    session: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = session.cancelled() => break,
            _ = tokio::time::sleep(period) => {
                if write_frame(&writer, &ServerFrame::Heartbeat, fragment).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn udp_loop(shared: Arc<Shared>) {
    let mut buf = [0u8; 64];
    loop {
        let received = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            received = shared.udp.recv_from(&mut buf) => received,
        };
        let (len, addr) = match received {
            Ok(received) => received,
            Err(e) => {
                debug!("udp receive failed: {}", e);
                continue;
            }
        };

        let stream_id = match decode_i32(&buf[..len]) {
            Ok(id) if len == 4 => id,
            _ => {
                warn!("Ignoring {} byte datagram from {}", len, addr);
                continue;
            }
        };

        let token = shared.streams.lock().get(&stream_id).cloned();
        match token {
            Some(token) => {
                info!("Stream {} registered from {}", stream_id, addr);
                shared.emit(ServerEvent::UdpRegistered { stream_id, addr });
                tokio::spawn(stream_audio(shared.clone(), addr, token));
            }
            None => warn!("Unknown stream id {} from {}", stream_id, addr),
        }
    }
}

async fn stream_audio(shared: Arc<Shared>, addr: SocketAddr, session: CancellationToken) {
    let config = &shared.config;
    if config.audio.is_empty() {
        return;
    }

    let mut sent = 0usize;
    'outer: loop {
        for segment in &config.audio {
            tokio::select! {
                _ = session.cancelled() => break 'outer,
                _ = tokio::time::sleep(config.packet_interval) => {}
            }
            if let Err(e) = shared.udp.send_to(segment, addr).await {
                debug!("udp send to {} failed: {}", addr, e);
                break 'outer;
            }
            sent += 1;
        }
        if !config.loop_audio {
            break;
        }
    }
    debug!("sent {} datagrams to {}", sent, addr);
}

/// Split interleaved PCM into datagram-sized segments that never cut an
/// audio frame
pub fn segment_pcm(data: &[u8], block_align: usize) -> Vec<Bytes> {
    let block_align = block_align.max(1);
    let segment = (MAX_SEGMENT_SIZE / block_align).max(1) * block_align;
    data.chunks(segment).map(Bytes::copy_from_slice).collect()
}

/// `frames` frames of a full-scale sine at `frequency` Hz in `format`
pub fn sine_wave(format: &AudioFormat, frequency: f32, frames: usize) -> Bytes {
    let mut out = BytesMut::with_capacity(frames * format.block_align());
    let step = 2.0 * std::f32::consts::PI * frequency / format.sample_rate.max(1) as f32;

    for n in 0..frames {
        let sample = (step * n as f32).sin() * 0.5;
        for _ in 0..format.channels {
            match format.encoding {
                Encoding::PcmFloat => out.extend_from_slice(&sample.to_le_bytes()),
                Encoding::Pcm8 => out.extend_from_slice(&[((sample * 127.0) as i16 + 128) as u8]),
                Encoding::Pcm16 => {
                    out.extend_from_slice(&((sample * i16::MAX as f32) as i16).to_le_bytes())
                }
                Encoding::Pcm24 => {
                    let value = (sample * 8_388_607.0) as i32;
                    out.extend_from_slice(&value.to_le_bytes()[..3]);
                }
                Encoding::Pcm32 => {
                    out.extend_from_slice(&((sample * i32::MAX as f32) as i32).to_le_bytes())
                }
                Encoding::Invalid => {}
            }
        }
    }
    out.freeze()
}
