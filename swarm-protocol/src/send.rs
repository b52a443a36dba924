//! Upload session state machine
//!
//! A [`SendSession`] tracks one chunk being streamed to one remote peer: which
//! units are in flight, when each was last transmitted, how many times, and the
//! congestion window that bounds how far past the cumulative ack the sender may
//! run. The session never touches a socket. Every method that decides to put a
//! unit on the wire returns its sequence number and records the transmission at
//! the supplied `now`, so the caller must send those units immediately.

use crate::chunk::{unit_count, ChunkHash};
use crate::congestion::CongestionController;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Retransmissions of every outstanding unit after which the peer is presumed dead
pub const MAX_RETRANSMITS: u32 = 3;

/// Per-unit transmission record
#[derive(Debug, Clone, Copy)]
struct UnitRecord {
    /// Time of the most recent transmission
    last_sent: Instant,
    /// Number of transmissions, first attempt included
    transmissions: u32,
    /// Acknowledged individually by the receiver
    acked: bool,
}

/// Result of processing one ACK packet
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AckOutcome {
    /// RTT observed for a first-attempt transmission, if this ack provides one
    pub rtt_sample: Option<Duration>,
    /// Units to put on the wire now, in order
    pub transmit: Vec<u32>,
    /// The cumulative ack now covers the whole chunk
    pub complete: bool,
}

/// Upload state for one chunk to one peer
#[derive(Debug, Clone)]
pub struct SendSession {
    /// Chunk being uploaded
    hash: ChunkHash,
    /// Length of the chunk in bytes
    chunk_len: usize,
    /// Number of data units in the chunk
    total_units: u32,
    /// Highest cumulative ack received
    ack: u32,
    /// Next never-sent sequence number
    next_seq: u32,
    /// Congestion window state
    congestion: CongestionController,
    /// Transmission records for units past the cumulative ack
    units: BTreeMap<u32, UnitRecord>,
}

impl SendSession {
    /// Start a session, transmitting unit 1 at `now`
    pub fn new(hash: ChunkHash, chunk_len: usize, now: Instant) -> Self {
        Self::with_congestion(hash, chunk_len, CongestionController::new(), now)
    }

    /// Start a session with a preconfigured congestion controller
    pub fn with_congestion(
        hash: ChunkHash,
        chunk_len: usize,
        congestion: CongestionController,
        now: Instant,
    ) -> Self {
        let mut session = SendSession {
            hash,
            chunk_len,
            total_units: unit_count(chunk_len),
            ack: 0,
            next_seq: 1,
            congestion,
            units: BTreeMap::new(),
        };

        if session.total_units > 0 {
            session.record_transmit(1, now);
            session.next_seq = 2;
        }

        session
    }

    /// Chunk being uploaded
    pub fn hash(&self) -> &ChunkHash {
        &self.hash
    }

    /// Length of the chunk in bytes
    pub fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    /// Number of data units in the chunk
    pub fn total_units(&self) -> u32 {
        self.total_units
    }

    /// Highest cumulative ack received
    pub fn ack(&self) -> u32 {
        self.ack
    }

    /// Next never-sent sequence number
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// Congestion window state
    pub fn congestion(&self) -> &CongestionController {
        &self.congestion
    }

    /// Number of transmissions of `seq` so far
    pub fn transmissions(&self, seq: u32) -> u32 {
        self.units.get(&seq).map_or(0, |unit| unit.transmissions)
    }

    /// Units sent but neither cumulatively nor individually acknowledged
    pub fn outstanding(&self) -> impl Iterator<Item = u32> + '_ {
        self.units
            .iter()
            .filter(|(_, unit)| !unit.acked)
            .map(|(seq, _)| *seq)
    }

    /// Whether the cumulative ack covers the whole chunk
    pub fn is_complete(&self) -> bool {
        self.ack >= self.total_units
    }

    fn record_transmit(&mut self, seq: u32, now: Instant) {
        let unit = self.units.entry(seq).or_insert(UnitRecord {
            last_sent: now,
            transmissions: 0,
            acked: false,
        });
        unit.last_sent = now;
        unit.transmissions += 1;
    }

    /// Process an ACK for unit `seq` carrying cumulative cursor `ack`
    pub fn on_ack(&mut self, seq: u32, ack: u32, now: Instant) -> AckOutcome {
        let mut outcome = AckOutcome::default();

        if let Some(unit) = self.units.get_mut(&seq) {
            if !unit.acked {
                if unit.transmissions == 1 {
                    outcome.rtt_sample = Some(now.saturating_duration_since(unit.last_sent));
                }
                unit.acked = true;
            }
        }

        let ack = ack.min(self.total_units);

        if ack > self.ack {
            self.ack = ack;
            self.congestion.on_new_ack();
            self.units.retain(|&unit_seq, _| unit_seq > ack);

            if self.is_complete() {
                outcome.complete = true;
                return outcome;
            }

            let limit = (ack + self.congestion.window() + 1).min(self.total_units);
            while self.next_seq <= limit {
                let seq = self.next_seq;
                self.record_transmit(seq, now);
                outcome.transmit.push(seq);
                self.next_seq += 1;
            }
        } else if ack == self.ack && self.congestion.on_duplicate_ack() {
            let seq = self.ack + 1;
            if seq < self.next_seq {
                tracing::debug!(seq, "fast retransmit");
                self.record_transmit(seq, now);
                outcome.transmit.push(seq);
            }
        }

        outcome
    }

    /// Collect units whose retransmission timer expired
    ///
    /// Every expired unit collapses the congestion window and is retransmitted
    /// under its original sequence number.
    pub fn poll_timeouts(&mut self, now: Instant, timeout: Duration) -> Vec<u32> {
        let expired: Vec<u32> = self
            .units
            .iter()
            .filter(|(_, unit)| {
                !unit.acked && now.saturating_duration_since(unit.last_sent) > timeout
            })
            .map(|(seq, _)| *seq)
            .collect();

        for &seq in &expired {
            tracing::debug!(seq, hash = %self.hash, "retransmission timeout");
            self.congestion.on_timeout();
            self.record_transmit(seq, now);
        }

        expired
    }

    /// Whether every outstanding unit has been retransmitted more than
    /// `max_retransmits` times without acknowledgment
    pub fn is_unresponsive(&self, max_retransmits: u32) -> bool {
        let mut outstanding = self.units.values().filter(|unit| !unit.acked).peekable();
        outstanding.peek().is_some()
            && outstanding.all(|unit| unit.transmissions > max_retransmits)
    }
}
