//! Swarm directory
//!
//! For every chunk hash the directory keeps a rotation queue of peers that
//! answered IHAVE, in arrival order. Peer selection is round-robin: the head
//! is the next candidate, and a candidate that is busy or failed is moved to
//! the tail. Duplicates are kept, so a peer that answered twice is picked
//! twice as often.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use swarm_protocol::ChunkHash;

/// Candidate peers per chunk
#[derive(Debug, Default)]
pub struct SwarmDirectory {
    candidates: HashMap<ChunkHash, VecDeque<SocketAddr>>,
}

impl SwarmDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `peer` holds `hash`
    pub fn add_candidate(&mut self, hash: ChunkHash, peer: SocketAddr) {
        self.candidates.entry(hash).or_default().push_back(peer);
    }

    /// Next candidate for `hash`, without consuming it
    pub fn peek(&self, hash: &ChunkHash) -> Option<SocketAddr> {
        self.candidates.get(hash).and_then(|queue| queue.front().copied())
    }

    /// Move the head candidate for `hash` to the tail
    pub fn rotate(&mut self, hash: &ChunkHash) {
        if let Some(queue) = self.candidates.get_mut(hash) {
            queue.rotate_left(1.min(queue.len()));
        }
    }

    /// Move the first occurrence of `peer` in the queue for `hash` to the tail
    pub fn demote(&mut self, hash: &ChunkHash, peer: SocketAddr) {
        if let Some(queue) = self.candidates.get_mut(hash) {
            if let Some(pos) = queue.iter().position(|candidate| *candidate == peer) {
                if let Some(demoted) = queue.remove(pos) {
                    queue.push_back(demoted);
                }
            }
        }
    }

    /// Candidates for `hash` in selection order
    pub fn candidates(&self, hash: &ChunkHash) -> Vec<SocketAddr> {
        self.candidates
            .get(hash)
            .map(|queue| queue.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of hashes with at least one candidate
    pub fn known_hashes(&self) -> usize {
        self.candidates.values().filter(|queue| !queue.is_empty()).count()
    }
}
