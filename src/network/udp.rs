//! UDP socket construction

use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::error::NetworkError;

/// Create a non-blocking UDP socket bound to `bind_addr`
///
/// `recv_buffer_size` is a hint; the kernel may clamp it and failure to apply
/// it is not fatal. Must be called from within a tokio runtime.
pub fn create_socket(
    bind_addr: SocketAddr,
    recv_buffer_size: Option<usize>,
) -> Result<UdpSocket, NetworkError> {
    let socket = Socket::new(
        Domain::for_address(bind_addr),
        Type::DGRAM,
        Some(Protocol::UDP),
    )
    .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    if let Some(size) = recv_buffer_size {
        if let Err(e) = socket.set_recv_buffer_size(size) {
            warn!("Failed to set UDP receive buffer to {} bytes: {}", size, e);
        }
    }

    socket.set_nonblocking(true)?;
    socket
        .bind(&bind_addr.into())
        .map_err(|e| NetworkError::BindFailed(format!("{bind_addr}: {e}")))?;

    let socket = UdpSocket::from_std(socket.into())?;
    debug!("UDP socket bound to {}", socket.local_addr()?);
    Ok(socket)
}
