//! Round-trip time estimation along the lines of RFC 6298, in integer milliseconds.

use crate::safe_converter::PrecheckedCast;
use std::cmp::{max, min};
use tracing::trace;

pub const RTO_MIN: u32 = 100;
pub const RTO_DEFAULT: u32 = 200;
pub const RTO_MAX: u32 = 50_000;

#[derive(Debug)]
pub struct RttEstimator {
    smoothed_rtt: u32,
    rtt_variance: u32,
    rto: u32,
    min_rto: u32,
    has_sample: bool,
}

impl RttEstimator {
    pub fn new(min_rto: u32) -> RttEstimator {
        RttEstimator {
            smoothed_rtt: 0,
            rtt_variance: 0,
            rto: RTO_DEFAULT,
            min_rto: min(min_rto, RTO_MAX),
            has_sample: false,
        }
    }

    #[cfg(test)]
    pub fn set_internals(&mut self, smoothed_rtt: u32, rtt_variance: u32) {
        self.smoothed_rtt = smoothed_rtt;
        self.rtt_variance = rtt_variance;
        self.has_sample = true;
    }

    pub fn rto(&self) -> u32 {
        self.rto
    }

    pub fn smoothed_rtt(&self) -> u32 {
        self.smoothed_rtt
    }

    pub fn rtt_variance(&self) -> u32 {
        self.rtt_variance
    }

    pub fn on_sample(&mut self, rtt: u32) {
        if self.has_sample {
            let delta = rtt.abs_diff(self.smoothed_rtt) as u64;
            self.rtt_variance = ((3 * self.rtt_variance as u64 + delta) / 4).prechecked_cast();
            self.smoothed_rtt = ((7 * self.smoothed_rtt as u64 + rtt as u64) / 8).prechecked_cast();
        }
        else {
            self.smoothed_rtt = rtt;
            self.rtt_variance = rtt / 2;
            self.has_sample = true;
        }

        let raw_rto = self.smoothed_rtt as u64 + max(1, 4 * self.rtt_variance as u64);
        self.rto = raw_rto.clamp(self.min_rto as u64, RTO_MAX as u64).prechecked_cast();

        trace!("RTT sample {}ms -> srtt={} rttvar={} rto={}", rtt, self.smoothed_rtt, self.rtt_variance, self.rto);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rstest::rstest;

    #[test]
    fn test_new() {
        let estimator = RttEstimator::new(RTO_MIN);
        assert_eq!(estimator.rto(), RTO_DEFAULT);
        assert!(!estimator.has_sample);
    }

    #[rstest]
    #[case::small(20, 20, 10, RTO_MIN)]
    #[case::above_min(40, 40, 20, 120)]
    #[case::medium(200, 200, 100, 600)]
    #[case::zero(0, 0, 0, RTO_MIN)]
    #[case::huge(40_000, 40_000, 20_000, RTO_MAX)]
    fn test_first_sample(#[case] sample: u32, #[case] expected_srtt: u32, #[case] expected_var: u32, #[case] expected_rto: u32) {
        let mut estimator = RttEstimator::new(RTO_MIN);
        estimator.on_sample(sample);
        assert_eq!(estimator.smoothed_rtt(), expected_srtt);
        assert_eq!(estimator.rtt_variance(), expected_var);
        assert_eq!(estimator.rto(), expected_rto);
    }

    #[rstest]
    #[case::steady(200, 0, 200, 200, 0, 201)]
    #[case::faster(200, 40, 120, 190, 50, 390)]
    #[case::slower(200, 40, 280, 210, 50, 410)]
    #[case::zero_variance_floor(150, 0, 150, 150, 0, 151)]
    #[case::below_min(50, 4, 50, 50, 3, RTO_MIN)]
    fn test_subsequent_sample(
        #[case] srtt: u32,
        #[case] var: u32,
        #[case] sample: u32,
        #[case] expected_srtt: u32,
        #[case] expected_var: u32,
        #[case] expected_rto: u32,
    ) {
        let mut estimator = RttEstimator::new(RTO_MIN);
        estimator.set_internals(srtt, var);
        estimator.on_sample(sample);
        assert_eq!(estimator.smoothed_rtt(), expected_srtt);
        assert_eq!(estimator.rtt_variance(), expected_var);
        assert_eq!(estimator.rto(), expected_rto);
    }

    #[rstest]
    #[case::default_min(RTO_MIN)]
    #[case::low_min(10)]
    #[case::min_above_max(RTO_MAX + 1)]
    fn test_rto_stays_in_bounds(#[case] min_rto: u32) {
        let mut rng = StdRng::seed_from_u64(min_rto as u64);
        let mut estimator = RttEstimator::new(min_rto);

        for i in 0..10_000 {
            let sample = match i % 4 {
                0 => rng.random_range(0..10),
                1 => rng.random_range(0..1_000),
                2 => rng.random_range(0..200_000),
                _ => rng.random::<u32>(),
            };
            estimator.on_sample(sample);

            assert!(estimator.rto() >= min(min_rto, RTO_MAX), "rto {} below minimum after sample {}", estimator.rto(), sample);
            assert!(estimator.rto() <= RTO_MAX, "rto {} above maximum after sample {}", estimator.rto(), sample);
        }
    }
}
