use std::cmp::min;
use tracing::{debug, trace};

pub const PROBE_INITIAL_INTERVAL: u32 = 10_000;
pub const PROBE_MAX_INTERVAL: u32 = 120_000;

/// Decides when to ask the peer for its receive window while that window is known to be zero.
///
/// This is a bounded exponential backoff: the first probe goes out one initial interval after
///  the window was first seen as zero, and every probe after that grows the interval by
///  `factor_eighths / 8` up to a maximum.
#[derive(Debug)]
pub struct WindowProbe {
    /// `None` while the peer's window is open
    next_probe_at: Option<u32>,
    interval: u32,

    config_initial_interval: u32,
    config_max_interval: u32,
    config_interval_factor_eighths: u32,
}

impl WindowProbe {
    pub fn new() -> WindowProbe {
        let result = WindowProbe {
            next_probe_at: None,
            interval: PROBE_INITIAL_INTERVAL,
            config_initial_interval: PROBE_INITIAL_INTERVAL,
            config_max_interval: PROBE_MAX_INTERVAL,
            config_interval_factor_eighths: 12,
        };

        assert!(result.config_interval_factor_eighths >= 8);

        result
    }

    pub fn is_armed(&self) -> bool {
        self.next_probe_at.is_some()
    }

    /// Called once per tick; returns `true` if an ASK_WINDOW_SIZE segment should be sent now
    #[must_use]
    pub fn poll(&mut self, now: u32, remote_window_size: u32) -> bool {
        if remote_window_size != 0 {
            if self.next_probe_at.take().is_some() {
                debug!("peer's receive window reopened - disarming window probe");
            }
            self.interval = self.config_initial_interval;
            return false;
        }

        let next_probe_at = match self.next_probe_at {
            Some(t) => t,
            None => {
                self.interval = self.config_initial_interval;
                let t = now.saturating_add(self.interval);
                debug!("peer's receive window is zero - first probe at {}", t);
                self.next_probe_at = Some(t);
                return false;
            }
        };

        if now < next_probe_at {
            return false;
        }

        self.interval = min(
            ((self.interval as u64 * self.config_interval_factor_eighths as u64) >> 3) as u32,
            self.config_max_interval,
        );
        self.next_probe_at = Some(now.saturating_add(self.interval));
        trace!("probing peer's receive window, next probe in {}ms", self.interval);
        true
    }
}
