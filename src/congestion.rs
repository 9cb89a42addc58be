//! TCP-style congestion control (Reno flavour) with the congestion window counted in packets.
//!
//! The window grows by one packet per acknowledgement round in slow start. In congestion
//!  avoidance it grows by roughly one packet per window's worth of acknowledgements, tracked
//!  through the byte counter `increase`. A retransmission timeout resets to slow start, while a
//!  fast retransmit halves the window based on the packets in flight.

use std::cmp::{max, min};
use tracing::{debug, instrument, trace};

pub const SSTHRESH_MIN: u32 = 2;

#[derive(Debug)]
pub struct CongestionControl {
    cwnd: u32,
    ssthresh: u32,
    /// byte-granular 'shadow' of cwnd used for growth during congestion avoidance
    increase: u64,
}

impl CongestionControl {
    pub fn new(mss: u32) -> CongestionControl {
        CongestionControl {
            cwnd: 1,
            ssthresh: SSTHRESH_MIN,
            increase: mss as u64,
        }
    }

    #[cfg(test)]
    pub fn set_internals(&mut self, cwnd: u32, ssthresh: u32, increase: u64) {
        self.cwnd = cwnd;
        self.ssthresh = ssthresh;
        self.increase = increase;
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    pub fn increase(&self) -> u64 {
        self.increase
    }

    pub fn is_slow_start(&self) -> bool {
        self.cwnd < self.ssthresh
    }

    /// One growth step, called when an incoming batch of segments moved the send-side ack
    ///  frontier forward
    #[instrument]
    pub fn on_ack_progress(&mut self, mss: u32, remote_window_size: u32) {
        if self.cwnd >= remote_window_size {
            trace!("cwnd already at the peer's receive window - no adjustment");
            return;
        }
        if mss == 0 {
            trace!("no payload capacity per segment - no adjustment");
            return;
        }

        let mss = mss as u64;
        if self.is_slow_start() {
            self.cwnd += 1;
            self.increase += mss;
        }
        else {
            self.increase = max(self.increase, mss);
            self.increase += (mss * mss) / self.increase + mss / 16;
            if (self.cwnd as u64 + 1) * mss <= self.increase {
                self.cwnd += 1;
            }
        }

        if self.cwnd > remote_window_size {
            self.cwnd = remote_window_size;
            self.increase = remote_window_size as u64 * mss;
        }

        trace!("cwnd={} increase={} ssthresh={}", self.cwnd, self.increase, self.ssthresh);
    }

    /// A segment's retransmission timer expired: back to slow start
    pub fn on_loss(&mut self, mss: u32) {
        self.ssthresh = max(self.cwnd / 2, SSTHRESH_MIN);
        self.cwnd = 1;
        self.increase = mss as u64;

        debug!("loss -> slow start with ssthresh {}", self.ssthresh);
    }

    /// A segment was retransmitted because enough later segments were acknowledged before it
    pub fn on_fast_retransmit(&mut self, mss: u32, num_packets_in_flight: u32, fast_retransmit_threshold: u32) {
        self.ssthresh = max(num_packets_in_flight / 2, SSTHRESH_MIN);
        self.cwnd = self.ssthresh.saturating_add(fast_retransmit_threshold);
        self.increase = self.cwnd as u64 * mss as u64;

        debug!("fast retransmit -> cwnd {}, ssthresh {}", self.cwnd, self.ssthresh);
    }

    /// The number of packets congestion control allows in flight, for a window that is
    ///  limited by other means as well
    pub fn limit(&self, window: u32) -> u32 {
        min(window, self.cwnd)
    }
}
