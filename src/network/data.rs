//! UDP data channel

use bytes::Bytes;
use std::net::{IpAddr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace};

use crate::codec::stream_id_datagram;
use crate::constants::MAX_DATAGRAM_SIZE;
use crate::error::{NetworkError, Result};
use crate::network::udp::create_socket;
use crate::protocol::{AudioFormat, StreamId};
use crate::session::stats::SessionStats;
use crate::sink::AudioSink;

/// Client end of the audio datagram flow
pub struct DataChannel {
    socket: UdpSocket,
    server_addr: SocketAddr,
}

impl DataChannel {
    /// Bind an ephemeral port on `local_ip`, the interface the control
    /// connection already uses
    pub fn bind(
        local_ip: IpAddr,
        server_addr: SocketAddr,
        recv_buffer_size: Option<usize>,
    ) -> Result<Self> {
        let socket = create_socket(SocketAddr::new(local_ip, 0), recv_buffer_size)?;
        Ok(Self {
            socket,
            server_addr,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr().map_err(NetworkError::from)?)
    }

    /// Register with the server by sending the stream id as the first
    /// datagram
    pub async fn open_stream(&self, stream_id: StreamId) -> Result<()> {
        let datagram = stream_id_datagram(stream_id);
        let sent = self
            .socket
            .send_to(&datagram, self.server_addr)
            .await
            .map_err(NetworkError::from)?;
        if sent != datagram.len() {
            return Err(NetworkError::ProtocolViolation(format!(
                "short registration datagram: {sent} of {} bytes",
                datagram.len()
            ))
            .into());
        }
        info!(
            "UDP {} registered stream {} with {}",
            self.local_addr()?,
            stream_id,
            self.server_addr
        );
        Ok(())
    }

    /// Deliver each datagram to `sink` unchanged, in arrival order. Only
    /// returns on a socket error.
    pub async fn run_receive_loop(
        &self,
        sink: &dyn AudioSink,
        format: &AudioFormat,
        stats: &SessionStats,
    ) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let block_align = format.block_align();

        loop {
            let (len, from) = self
                .socket
                .recv_from(&mut buf)
                .await
                .map_err(NetworkError::from)?;
            if len == 0 {
                continue;
            }

            let frames = format.frames_in(len);
            let whole_frames = frames * block_align == len;
            if !whole_frames {
                debug!(
                    "datagram of {} bytes from {} is not a multiple of {}",
                    len, from, block_align
                );
            }
            trace!("received {} bytes ({} frames) from {}", len, frames, from);

            stats.record_datagram(len, whole_frames);
            sink.on_audio_data(Bytes::copy_from_slice(&buf[..len]));
        }
    }
}
