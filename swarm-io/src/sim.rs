//! In-memory lossy datagram network
//!
//! [`SimNetwork`] stands in for the harness-provided network in tests and
//! local runs. Each endpoint owns a channel. Links between endpoints can be
//! taken down or made to drop a deterministic fraction of datagrams, and an
//! endpoint can be removed entirely to simulate a crashed peer.

use crate::transport::{DatagramTransport, SocketError};
use bytes::Bytes;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Directional link behavior
#[derive(Debug, Clone, Copy, Default)]
struct LinkPolicy {
    /// Drop everything on this link
    down: bool,
    /// Drop every n-th datagram on this link
    drop_every: Option<u32>,
    /// Datagrams offered to this link so far
    offered: u32,
}

impl LinkPolicy {
    fn admit(&mut self) -> bool {
        self.offered = self.offered.wrapping_add(1);
        if self.down {
            return false;
        }
        match self.drop_every {
            Some(n) if n > 0 => self.offered % n != 0,
            _ => true,
        }
    }
}

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    /// Datagrams handed to a live endpoint
    pub delivered: u64,
    /// Datagrams lost to link policy or a missing endpoint
    pub dropped: u64,
}

#[derive(Default)]
struct SimState {
    endpoints: HashMap<SocketAddr, Sender<(Bytes, SocketAddr)>>,
    links: HashMap<(SocketAddr, SocketAddr), LinkPolicy>,
    stats: SimStats,
}

/// Shared in-memory network
#[derive(Clone, Default)]
pub struct SimNetwork {
    state: Arc<Mutex<SimState>>,
}

impl SimNetwork {
    /// Create an empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an endpoint at `addr`, replacing any previous one
    pub fn endpoint(&self, addr: SocketAddr) -> SimSocket {
        let (tx, rx) = channel::unbounded();
        self.state.lock().endpoints.insert(addr, tx);

        SimSocket {
            addr,
            network: self.clone(),
            rx,
            read_timeout: Duration::from_millis(100),
        }
    }

    /// Detach the endpoint at `addr`; datagrams sent to it are lost
    pub fn disconnect(&self, addr: SocketAddr) {
        self.state.lock().endpoints.remove(&addr);
    }

    /// Take the link from `from` to `to` down or bring it back up
    pub fn set_link_down(&self, from: SocketAddr, to: SocketAddr, down: bool) {
        self.state.lock().links.entry((from, to)).or_default().down = down;
    }

    /// Drop every `n`-th datagram from `from` to `to` (`None` restores the link)
    pub fn set_drop_every(&self, from: SocketAddr, to: SocketAddr, n: Option<u32>) {
        self.state.lock().links.entry((from, to)).or_default().drop_every = n;
    }

    /// Delivery counters so far
    pub fn stats(&self) -> SimStats {
        self.state.lock().stats
    }

    fn deliver(&self, from: SocketAddr, to: SocketAddr, buf: &[u8]) {
        let mut state = self.state.lock();

        let admitted = state
            .links
            .get_mut(&(from, to))
            .map_or(true, LinkPolicy::admit);

        let sent = admitted
            && state
                .endpoints
                .get(&to)
                .is_some_and(|tx| tx.send((Bytes::copy_from_slice(buf), from)).is_ok());

        if sent {
            state.stats.delivered += 1;
        } else {
            tracing::trace!(%from, %to, len = buf.len(), "datagram dropped");
            state.stats.dropped += 1;
        }
    }
}

/// One endpoint of a [`SimNetwork`]
#[derive(Clone)]
pub struct SimSocket {
    addr: SocketAddr,
    network: SimNetwork,
    rx: Receiver<(Bytes, SocketAddr)>,
    read_timeout: Duration,
}

impl SimSocket {
    /// Change how long a receive waits before reporting a timeout
    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    /// Receive a datagram only if one is already queued
    pub fn try_recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), SocketError> {
        match self.rx.try_recv() {
            Ok((data, from)) => Ok(copy_out(&data, buf, from)),
            Err(TryRecvError::Empty) => Err(SocketError::TimedOut),
            Err(TryRecvError::Disconnected) => Err(SocketError::Closed),
        }
    }
}

fn copy_out(data: &[u8], buf: &mut [u8], from: SocketAddr) -> (usize, SocketAddr) {
    // Oversized datagrams are truncated like a real UDP receive
    let n = data.len().min(buf.len());
    buf[..n].copy_from_slice(&data[..n]);
    (n, from)
}

impl DatagramTransport for SimSocket {
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError> {
        self.network.deliver(self.addr, target, buf);
        Ok(buf.len())
    }

    fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), SocketError> {
        match self.rx.recv_timeout(self.read_timeout) {
            Ok((data, from)) => Ok(copy_out(&data, buf, from)),
            Err(RecvTimeoutError::Timeout) => Err(SocketError::TimedOut),
            Err(RecvTimeoutError::Disconnected) => Err(SocketError::Closed),
        }
    }

    fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        Ok(self.addr)
    }
}
