//! Peer directory
//!
//! The directory maps peer identities to their UDP endpoints. It is read once
//! at startup from a text file with one `<id> <host> <port>` entry per line.
//! Blank lines and lines starting with `#` are skipped.

use std::collections::BTreeMap;
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use thiserror::Error;

/// Peer list errors
#[derive(Error, Debug)]
pub enum PeerListError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("Line {line}: duplicate peer id {id}")]
    Duplicate { line: usize, id: u32 },
}

/// Identity to address mapping for every node in the swarm
#[derive(Debug, Clone, Default)]
pub struct PeerDirectory {
    peers: BTreeMap<u32, SocketAddr>,
}

impl PeerDirectory {
    /// Build a directory from explicit entries
    pub fn from_entries(entries: impl IntoIterator<Item = (u32, SocketAddr)>) -> Self {
        PeerDirectory {
            peers: entries.into_iter().collect(),
        }
    }

    /// Load a directory from a peer list file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PeerListError> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse peer list text
    pub fn parse(contents: &str) -> Result<Self, PeerListError> {
        let mut peers = BTreeMap::new();

        for (index, raw) in contents.lines().enumerate() {
            let line = index + 1;
            let entry = raw.trim();
            if entry.is_empty() || entry.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = entry.split_whitespace().collect();
            let [id, host, port] = fields[..] else {
                return Err(PeerListError::Parse {
                    line,
                    reason: format!("expected '<id> <host> <port>', got '{}'", entry),
                });
            };

            let id: u32 = id.parse().map_err(|_| PeerListError::Parse {
                line,
                reason: format!("invalid peer id '{}'", id),
            })?;
            let port: u16 = port.parse().map_err(|_| PeerListError::Parse {
                line,
                reason: format!("invalid port '{}'", port),
            })?;
            let addr = (host, port)
                .to_socket_addrs()
                .ok()
                .and_then(|mut addrs| addrs.next())
                .ok_or_else(|| PeerListError::Parse {
                    line,
                    reason: format!("cannot resolve host '{}'", host),
                })?;

            if peers.insert(id, addr).is_some() {
                return Err(PeerListError::Duplicate { line, id });
            }
        }

        Ok(PeerDirectory { peers })
    }

    /// Address of the peer with the given identity
    pub fn address_of(&self, id: u32) -> Option<SocketAddr> {
        self.peers.get(&id).copied()
    }

    /// Addresses of every peer except `identity`
    pub fn others(&self, identity: u32) -> impl Iterator<Item = SocketAddr> + '_ {
        self.peers
            .iter()
            .filter(move |(id, _)| **id != identity)
            .map(|(_, addr)| *addr)
    }

    /// Number of peers in the directory
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether the directory is empty
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
