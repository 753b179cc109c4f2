//! The shared acquisition limiter: tracks samples seen and elapsed time
//! against the `limit-samples`/`limit-msec` configuration keys and tells
//! a driver's acquisition loop when to stop.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Limiter {
    samples_seen: u64,
    start_time: Instant,
    limit_samples: Option<u64>,
    limit_msec: Option<u64>,
}

impl Limiter {
    pub fn new(limit_samples: Option<u64>, limit_msec: Option<u64>) -> Self {
        Limiter {
            samples_seen: 0,
            start_time: Instant::now(),
            limit_samples,
            limit_msec,
        }
    }

    /// Records that `count` additional samples were submitted and
    /// returns whether the acquisition should now stop.
    pub fn submit(&mut self, count: u64) -> bool {
        self.samples_seen += count;
        self.should_stop()
    }

    pub fn should_stop(&self) -> bool {
        if let Some(limit) = self.limit_samples {
            if self.samples_seen >= limit {
                return true;
            }
        }
        if let Some(limit) = self.limit_msec {
            if self.elapsed() >= Duration::from_millis(limit) {
                return true;
            }
        }
        false
    }

    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_once_sample_limit_reached() {
        let mut lim = Limiter::new(Some(100), None);
        for _ in 0..9 {
            assert!(!lim.submit(10));
        }
        assert!(lim.submit(10));
        assert_eq!(lim.samples_seen(), 100);
    }

    #[test]
    fn no_limits_never_stops() {
        let mut lim = Limiter::new(None, None);
        assert!(!lim.submit(1_000_000));
    }

    #[test]
    fn msec_limit_stops_after_elapsed_time() {
        let mut lim = Limiter::new(None, Some(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(lim.submit(1));
    }
}
