//! Round-trip time estimation
//!
//! One estimator is kept per remote peer and survives across chunk transfers.
//! Smoothing follows the classic EWMA rule:
//!
//! ```text
//! estimated = (1 - α) · estimated + α · sample
//! deviation = (1 - β) · deviation + β · |sample - estimated|
//! timeout   = estimated + 4 · deviation
//! ```

use std::time::Duration;

/// Smoothing factor for the estimated RTT
pub const ALPHA: f64 = 0.125;

/// Smoothing factor for the RTT deviation
pub const BETA: f64 = 0.25;

/// Timeout multiple applied to the very first sample
pub const INITIAL_TIMEOUT_FACTOR: f64 = 3.0;

/// Timeout used before any sample has been taken
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// RTT estimator for one peer
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Smoothed RTT (seconds)
    estimated: f64,
    /// RTT deviation (seconds)
    deviation: f64,
    /// Current timeout interval (seconds)
    timeout: f64,
    /// Number of samples taken
    sample_count: u32,
    /// Externally configured timeout, overrides estimation entirely
    fixed: Option<Duration>,
}

impl RttEstimator {
    /// Create a new estimator
    ///
    /// When `fixed` is set, [`RttEstimator::timeout`] always returns it, while
    /// samples are still folded into the estimate for statistics.
    pub fn new(fixed: Option<Duration>) -> Self {
        RttEstimator {
            estimated: 0.0,
            deviation: 0.0,
            timeout: DEFAULT_TIMEOUT.as_secs_f64(),
            sample_count: 0,
            fixed,
        }
    }

    /// Fold in a new RTT observation
    pub fn sample(&mut self, observed: Duration) {
        let sample = observed.as_secs_f64();

        if self.sample_count == 0 {
            self.estimated = sample;
            self.deviation = 0.0;
            self.timeout = INITIAL_TIMEOUT_FACTOR * sample;
        } else {
            self.estimated = (1.0 - ALPHA) * self.estimated + ALPHA * sample;
            self.deviation =
                (1.0 - BETA) * self.deviation + BETA * (sample - self.estimated).abs();
            self.timeout = self.estimated + 4.0 * self.deviation;
        }

        self.sample_count += 1;
        tracing::trace!(
            sample_ms = sample * 1000.0,
            timeout_ms = self.timeout * 1000.0,
            "rtt sample"
        );
    }

    /// Whether at least one sample has been taken
    pub fn is_sampled(&self) -> bool {
        self.sample_count > 0
    }

    /// Number of samples taken
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// Smoothed RTT
    pub fn estimated_rtt(&self) -> Duration {
        Duration::from_secs_f64(self.estimated)
    }

    /// RTT deviation
    pub fn deviation(&self) -> Duration {
        Duration::from_secs_f64(self.deviation)
    }

    /// Retransmission timeout interval
    pub fn timeout(&self) -> Duration {
        match self.fixed {
            Some(fixed) => fixed,
            None => Duration::from_secs_f64(self.timeout),
        }
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new(None)
    }
}
