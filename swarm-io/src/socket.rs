//! UDP socket wrapper for swarm peers
//!
//! Sockets are configured through `socket2` and then used as a plain blocking
//! `UdpSocket` with a read timeout, so a receive pump can wake up regularly
//! and notice shutdown.

use crate::transport::{DatagramTransport, SocketError};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

/// Default receive timeout for blocking reads
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Socket buffer size requested from the OS
const SOCKET_BUFFER_SIZE: usize = 1 << 20;

/// UDP socket used by a swarm peer
#[derive(Debug)]
pub struct PeerSocket {
    inner: UdpSocket,
}

impl PeerSocket {
    /// Create a socket bound to the given address
    pub fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;

        // Large buffers absorb a full congestion window of data units
        if let Err(e) = socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE) {
            tracing::debug!("could not grow receive buffer: {}", e);
        }
        if let Err(e) = socket.set_send_buffer_size(SOCKET_BUFFER_SIZE) {
            tracing::debug!("could not grow send buffer: {}", e);
        }

        socket.bind(&addr.into())?;
        socket.set_read_timeout(Some(DEFAULT_READ_TIMEOUT))?;

        Ok(PeerSocket {
            inner: socket.into(),
        })
    }

    /// Change how long a receive waits before reporting a timeout
    pub fn set_read_timeout(&self, timeout: Duration) -> Result<(), SocketError> {
        self.inner.set_read_timeout(Some(timeout))?;
        Ok(())
    }

    /// Get the receive buffer size
    pub fn recv_buffer_size(&self) -> Result<usize, SocketError> {
        Ok(socket2::SockRef::from(&self.inner).recv_buffer_size()?)
    }

    /// Try to clone the socket (both handles share the same OS socket)
    pub fn try_clone(&self) -> Result<Self, SocketError> {
        Ok(PeerSocket {
            inner: self.inner.try_clone()?,
        })
    }
}

impl DatagramTransport for PeerSocket {
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError> {
        Ok(self.inner.send_to(buf, target)?)
    }

    fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), SocketError> {
        match self.inner.recv_from(buf) {
            Ok(result) => Ok(result),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Err(SocketError::TimedOut)
            }
            Err(e) => Err(SocketError::Io(e)),
        }
    }

    fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        Ok(self.inner.local_addr()?)
    }
}
