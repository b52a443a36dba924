//! Datagram transport abstraction
//!
//! The engine only needs unreliable, unordered datagram delivery. Anything
//! that can send a byte buffer to an address and hand back received buffers
//! with their source can carry the swarm protocol.

use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use thiserror::Error;

/// Transport errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Receive timed out")]
    TimedOut,

    #[error("Transport closed")]
    Closed,
}

impl SocketError {
    /// Whether this error only means no datagram arrived in time
    pub fn is_timeout(&self) -> bool {
        match self {
            SocketError::TimedOut => true,
            SocketError::Io(e) => matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
            _ => false,
        }
    }
}

/// Unreliable datagram transport
pub trait DatagramTransport {
    /// Send one datagram to `target`
    ///
    /// Success only means the datagram was handed off, not that it arrived.
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError>;

    /// Receive one datagram, waiting at most the transport's read timeout
    fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), SocketError>;

    /// Address this transport receives on
    fn local_addr(&self) -> Result<SocketAddr, SocketError>;
}

impl<T: DatagramTransport + ?Sized> DatagramTransport for &T {
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError> {
        (**self).send_to(buf, target)
    }

    fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), SocketError> {
        (**self).recv_from(buf)
    }

    fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        (**self).local_addr()
    }
}
