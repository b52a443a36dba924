//! Congestion Control for swarm uploads
//!
//! AIMD window management: slow start grows the window by one unit per new
//! acknowledgment until it reaches the slow-start threshold, congestion
//! avoidance then grows it by `1/cwnd`. Loss (timeout or triple duplicate ack)
//! halves the threshold and restarts slow start from a window of one.

/// Initial congestion window (units)
pub const INITIAL_CWND: f64 = 1.0;

/// Initial slow-start threshold (units)
pub const INITIAL_SSTHRESH: u32 = 64;

/// Smallest slow-start threshold after a loss event
pub const MIN_SSTHRESH: u32 = 2;

/// Duplicate acks that trigger a fast retransmit
pub const DUP_ACK_THRESHOLD: u32 = 3;

/// Congestion control phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongestionMode {
    /// Window grows by one unit per new ack
    SlowStart,
    /// Window grows by `1/cwnd` per new ack
    CongestionAvoidance,
}

/// Congestion control state for one upload session
#[derive(Debug, Clone)]
pub struct CongestionController {
    /// Congestion window (units, fractional during congestion avoidance)
    cwnd: f64,
    /// Slow start threshold
    ssthresh: u32,
    /// Current phase
    mode: CongestionMode,
    /// Duplicate acks seen since the last new ack
    duplicate_acks: u32,
}

impl CongestionController {
    /// Create a controller in slow start with the default threshold
    pub fn new() -> Self {
        Self::with_ssthresh(INITIAL_SSTHRESH)
    }

    /// Create a controller in slow start with a custom threshold
    pub fn with_ssthresh(ssthresh: u32) -> Self {
        CongestionController {
            cwnd: INITIAL_CWND,
            ssthresh: ssthresh.max(MIN_SSTHRESH),
            mode: CongestionMode::SlowStart,
            duplicate_acks: 0,
        }
    }

    /// Get the congestion window
    pub fn cwnd(&self) -> f64 {
        self.cwnd
    }

    /// Get the congestion window rounded down to whole units
    pub fn window(&self) -> u32 {
        self.cwnd.floor() as u32
    }

    /// Get the slow start threshold
    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    /// Get the current phase
    pub fn mode(&self) -> CongestionMode {
        self.mode
    }

    /// Get the duplicate ack counter
    pub fn duplicate_acks(&self) -> u32 {
        self.duplicate_acks
    }

    /// Record an ack that advanced the cumulative cursor
    pub fn on_new_ack(&mut self) {
        self.duplicate_acks = 0;

        match self.mode {
            CongestionMode::SlowStart => {
                self.cwnd += 1.0;
                if self.cwnd >= self.ssthresh as f64 {
                    self.mode = CongestionMode::CongestionAvoidance;
                    tracing::debug!(
                        cwnd = self.cwnd,
                        ssthresh = self.ssthresh,
                        "entering congestion avoidance"
                    );
                }
            }
            CongestionMode::CongestionAvoidance => {
                self.cwnd += 1.0 / self.cwnd;
            }
        }
    }

    /// Record an ack equal to the current cumulative cursor
    ///
    /// Returns true exactly when this ack is the third duplicate, in which case
    /// the window has been collapsed and the caller must fast-retransmit.
    pub fn on_duplicate_ack(&mut self) -> bool {
        self.duplicate_acks += 1;

        if self.duplicate_acks == DUP_ACK_THRESHOLD {
            self.collapse();
            true
        } else {
            false
        }
    }

    /// Record a retransmission timeout
    pub fn on_timeout(&mut self) {
        self.collapse();
    }

    fn collapse(&mut self) {
        self.ssthresh = (self.cwnd / 2.0).floor().max(MIN_SSTHRESH as f64) as u32;
        self.cwnd = INITIAL_CWND;
        self.mode = CongestionMode::SlowStart;
        tracing::debug!(ssthresh = self.ssthresh, "congestion window collapsed");
    }

    /// Get statistics
    pub fn stats(&self) -> CongestionStats {
        CongestionStats {
            cwnd: self.cwnd,
            ssthresh: self.ssthresh,
            slow_start: self.mode == CongestionMode::SlowStart,
        }
    }
}

impl Default for CongestionController {
    fn default() -> Self {
        Self::new()
    }
}

/// Congestion control statistics
#[derive(Debug, Clone, Copy)]
pub struct CongestionStats {
    /// Current congestion window
    pub cwnd: f64,
    /// Slow start threshold
    pub ssthresh: u32,
    /// Whether in slow start phase
    pub slow_start: bool,
}
