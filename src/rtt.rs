//! Round-trip time estimation and the retransmission timeout.
//!
//! Jacobson's algorithm with Karn's rule: `SRTT` and `RTTVAR` are
//! exponentially weighted (gains 1/8 and 1/4), the timeout is
//! `SRTT + max(G, 4 * RTTVAR)`, and no sample is ever taken from a
//! segment that was retransmitted, since its acknowledgement is
//! ambiguous. Timestamp-based samples are taken by the connection
//! instead when the option is negotiated, which sidesteps the ambiguity.

use crate::seq::seq_le;
use std::time::Duration;

/// Clock granularity `G` used in the timeout formula.
const GRANULARITY: Duration = Duration::from_millis(1);

/// The timeout before any sample exists (RFC 6298).
const INITIAL_RTO: Duration = Duration::from_secs(1);

const MIN_RTO: Duration = Duration::from_secs(1);
const MAX_RTO: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct RttEstimator {
    /// Smoothed round-trip time; `None` until the first sample.
    srtt: Option<Duration>,
    rttvar: Duration,
    rto: Duration,
    /// The segment currently being timed: when it was sent and the
    /// acknowledgement that will cover it.
    timing: Option<(Duration, u32)>,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self {
            srtt: None,
            rttvar: Duration::ZERO,
            rto: INITIAL_RTO,
            timing: None,
        }
    }
}

impl RttEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current retransmission timeout.
    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// The smoothed round-trip time, once one exists.
    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }

    /// Notes that a segment ending at `seq_end` left at `clock`. Only
    /// one segment is timed at a time.
    pub fn on_send(&mut self, clock: Duration, seq_end: u32) {
        if self.timing.is_none() {
            self.timing = Some((clock, seq_end));
        }
    }

    /// Karn's rule: a retransmission invalidates the outstanding timing.
    pub fn on_retransmit(&mut self) {
        self.timing = None;
    }

    /// Feeds an acknowledgement; takes a sample if it covers the timed
    /// segment.
    pub fn on_ack(&mut self, clock: Duration, ack: u32) {
        if let Some((sent_at, seq_end)) = self.timing {
            if seq_le(seq_end, ack) {
                self.timing = None;
                self.sample(clock.saturating_sub(sent_at));
            }
        }
    }

    /// Feeds a measured round trip directly, e.g. from the timestamp
    /// option.
    pub fn sample(&mut self, r: Duration) {
        let srtt = match self.srtt {
            None => {
                self.rttvar = r / 2;
                r
            }
            Some(srtt) => {
                let deviation = if srtt > r { srtt - r } else { r - srtt };
                self.rttvar = self.rttvar * 3 / 4 + deviation / 4;
                srtt * 7 / 8 + r / 8
            }
        };
        self.srtt = Some(srtt);
        self.rto = (srtt + GRANULARITY.max(self.rttvar * 4)).clamp(MIN_RTO, MAX_RTO);
    }

    /// Exponential backoff after a timeout.
    pub fn backoff(&mut self) {
        self.rto = (self.rto * 2).min(MAX_RTO);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_one_second() {
        let rtt = RttEstimator::new();
        assert_eq!(rtt.rto(), Duration::from_secs(1));
    }

    #[test]
    fn first_sample_seeds_the_estimate() {
        let mut rtt = RttEstimator::new();
        rtt.sample(Duration::from_millis(200));
        assert_eq!(rtt.srtt(), Some(Duration::from_millis(200)));
        // 200ms + 4 * 100ms, clamped up to the 1s floor.
        assert_eq!(rtt.rto(), Duration::from_secs(1));
    }

    #[test]
    fn variance_drives_the_timeout() {
        let mut rtt = RttEstimator::new();
        rtt.sample(Duration::from_millis(100));
        for _ in 0..20 {
            rtt.sample(Duration::from_millis(500));
        }
        let srtt = rtt.srtt().unwrap();
        assert!(srtt > Duration::from_millis(400));
        assert!(rtt.rto() >= MIN_RTO);
        assert!(rtt.rto() <= MAX_RTO);
    }

    #[test]
    fn timing_follows_karns_rule() {
        let mut rtt = RttEstimator::new();
        rtt.on_send(Duration::from_millis(10), 1100);
        // A retransmission poisons the sample; the later ACK is ignored.
        rtt.on_retransmit();
        rtt.on_ack(Duration::from_millis(500), 1100);
        assert_eq!(rtt.srtt(), None);

        // A clean exchange is sampled.
        rtt.on_send(Duration::from_millis(600), 2100);
        rtt.on_ack(Duration::from_millis(850), 2100);
        assert_eq!(rtt.srtt(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn partial_ack_does_not_sample() {
        let mut rtt = RttEstimator::new();
        rtt.on_send(Duration::ZERO, 2000);
        rtt.on_ack(Duration::from_millis(100), 1500);
        assert_eq!(rtt.srtt(), None);
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        let mut rtt = RttEstimator::new();
        for _ in 0..10 {
            rtt.backoff();
        }
        assert_eq!(rtt.rto(), MAX_RTO);
    }
}
