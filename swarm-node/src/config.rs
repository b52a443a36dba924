//! Engine configuration

use std::time::Duration;
use swarm_protocol::packet::DEFAULT_TEAM_ID;
use swarm_protocol::MAX_RETRANSMITS;

/// Default cap on concurrent uploads
pub const DEFAULT_MAX_CONN: usize = 4;

/// Stall threshold multiple of the peer's timeout interval
pub const DEFAULT_STALL_FACTOR: u32 = 5;

/// Stall threshold used when no RTT has been sampled for a peer
pub const DEFAULT_STALL_FALLBACK: Duration = Duration::from_secs(5);

/// An IHAVE older than this no longer yields an RTT sample when the GET arrives
pub const DEFAULT_IHAVE_MAX_AGE: Duration = Duration::from_secs(10);

/// Configuration consumed by the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// This node's identity in the peer directory
    pub identity: u32,
    /// Maximum concurrent upload sessions
    pub max_conn: usize,
    /// Fixed retransmission timeout; `None` estimates it from RTT samples
    pub fixed_timeout: Option<Duration>,
    /// Team identifier written into outgoing packets
    pub team_id: u8,
    /// Check reassembled chunks against their SHA-1 hash
    pub verify_chunks: bool,
    /// A download stalls after this many timeout intervals without data
    pub stall_factor: u32,
    /// Stall threshold when the peer has no sampled RTT
    pub stall_fallback: Duration,
    /// Retransmissions of every outstanding unit before an upload is abandoned
    pub max_retransmits: u32,
    /// Longest IHAVE-to-GET gap still counted as a round trip
    pub ihave_max_age: Duration,
}

impl EngineConfig {
    /// Configuration with defaults for everything but the identity
    pub fn new(identity: u32) -> Self {
        EngineConfig {
            identity,
            max_conn: DEFAULT_MAX_CONN,
            fixed_timeout: None,
            team_id: DEFAULT_TEAM_ID,
            verify_chunks: false,
            stall_factor: DEFAULT_STALL_FACTOR,
            stall_fallback: DEFAULT_STALL_FALLBACK,
            max_retransmits: MAX_RETRANSMITS,
            ihave_max_age: DEFAULT_IHAVE_MAX_AGE,
        }
    }

    /// Set the upload concurrency cap
    pub fn with_max_conn(mut self, max_conn: usize) -> Self {
        self.max_conn = max_conn;
        self
    }

    /// Pin the retransmission timeout
    pub fn with_fixed_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fixed_timeout = timeout;
        self
    }

    /// Enable or disable chunk verification
    pub fn with_verify_chunks(mut self, verify: bool) -> Self {
        self.verify_chunks = verify;
        self
    }
}
