//! Download-side reassembly buffer
//!
//! Units may arrive out of order or more than once. Each new unit is parked
//! in the reassembly buffer, then everything contiguous with the cumulative
//! cursor is drained into the assembled chunk.

use crate::chunk::{unit_count, unit_range, ChunkHash, CHUNK_SIZE};
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

/// Download state for one chunk from one peer
#[derive(Debug)]
pub struct ReceiveSession {
    /// Chunk being downloaded
    hash: ChunkHash,
    /// Expected chunk length in bytes
    chunk_len: usize,
    /// Out-of-order units waiting for the gap before them to fill
    buffer: BTreeMap<u32, Bytes>,
    /// Every sequence number accepted so far
    received: HashSet<u32>,
    /// Cumulative ack: all units through this one are assembled
    ack: u32,
    /// Contiguous bytes assembled so far
    assembled: BytesMut,
    /// When the GET for this chunk was sent
    requested_at: Instant,
    /// Last time any unit arrived, duplicates included
    last_activity: Instant,
}

impl ReceiveSession {
    /// Start a session for a full-size chunk requested at `now`
    pub fn new(hash: ChunkHash, now: Instant) -> Self {
        Self::with_chunk_len(hash, CHUNK_SIZE, now)
    }

    /// Start a session for a chunk of `chunk_len` bytes
    pub fn with_chunk_len(hash: ChunkHash, chunk_len: usize, now: Instant) -> Self {
        ReceiveSession {
            hash,
            chunk_len,
            buffer: BTreeMap::new(),
            received: HashSet::new(),
            ack: 0,
            assembled: BytesMut::with_capacity(chunk_len),
            requested_at: now,
            last_activity: now,
        }
    }

    /// Chunk being downloaded
    pub fn hash(&self) -> &ChunkHash {
        &self.hash
    }

    /// Cumulative ack cursor
    pub fn ack(&self) -> u32 {
        self.ack
    }

    /// Bytes assembled contiguously so far
    pub fn assembled_len(&self) -> usize {
        self.assembled.len()
    }

    /// Units parked out of order
    pub fn buffered_units(&self) -> usize {
        self.buffer.len()
    }

    /// When the GET for this chunk was sent
    pub fn requested_at(&self) -> Instant {
        self.requested_at
    }

    /// Last time any unit arrived
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Whether the whole chunk has been assembled
    pub fn is_complete(&self) -> bool {
        self.assembled.len() == self.chunk_len
    }

    /// Number of distinct units accepted so far
    pub fn units_received(&self) -> usize {
        self.received.len()
    }

    /// Process data unit `seq` and return the cumulative ack to send back
    ///
    /// Units whose length does not match their position in the chunk are
    /// refused with `None`. A refused unit neither refreshes the activity
    /// timestamp nor earns an ack. Accepted units, duplicates included, do both.
    pub fn on_data(&mut self, seq: u32, payload: Bytes, now: Instant) -> Option<u32> {
        let fits = unit_range(seq, self.chunk_len).is_some_and(|range| range.len() == payload.len());

        if !fits {
            tracing::trace!(seq, len = payload.len(), hash = %self.hash, "data unit out of bounds");
            return None;
        }

        self.last_activity = now;

        if self.received.insert(seq) {
            self.buffer.insert(seq, payload);

            while let Some(next) = self.buffer.remove(&(self.ack + 1)) {
                self.assembled.extend_from_slice(&next);
                self.ack += 1;
            }
        }

        Some(self.ack)
    }

    /// Total number of units in the chunk
    pub fn total_units(&self) -> u32 {
        unit_count(self.chunk_len)
    }

    /// Consume the session, returning the assembled bytes
    pub fn into_chunk(self) -> Bytes {
        self.assembled.freeze()
    }
}
