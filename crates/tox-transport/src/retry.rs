//! Exponential backoff with jitter, shared by the bootstrap manager and the
//! friend-request retry queue.

use std::time::Duration;

use rand::Rng;

/// Backoff schedule parameters.
#[derive(Clone, Copy, Debug)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Growth factor applied to the delay after each attempt.
    pub multiplier: f64,
    /// Upper bound on the delay, regardless of attempt count.
    pub max_delay: Duration,
    /// Attempts beyond this count are refused by [`Backoff::next_delay`].
    pub max_attempts: u32,
}

impl BackoffConfig {
    /// The DHT bootstrap schedule: ×1.5 growth, capped at 2 minutes,
    /// 5 attempts.
    pub fn dht_bootstrap() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 1.5,
            max_delay: Duration::from_secs(120),
            max_attempts: 5,
        }
    }

    /// The friend-request schedule: 5 seconds doubling, 10 attempts.
    pub fn friend_request() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_delay: Duration::from_secs(120),
            max_attempts: 10,
        }
    }
}

/// Tracks the attempt count for a single backoff sequence and computes the
/// next jittered delay.
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Number of attempts made so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether the schedule is exhausted and no further retry should be
    /// scheduled.
    pub fn exhausted(&self) -> bool {
        self.attempt >= self.config.max_attempts
    }

    /// Compute the next delay and advance the attempt counter. Returns
    /// `None` once [`Self::exhausted`] would be true.
    pub fn next_delay<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }
        let base = self.config.initial_delay.as_secs_f64()
            * self.config.multiplier.powi(self.attempt as i32);
        let capped = base.min(self.config.max_delay.as_secs_f64());
        let jitter_factor = rng.gen_range(0.5..1.5);
        let jittered = (capped * jitter_factor).max(0.0);
        self.attempt += 1;
        Some(Duration::from_secs_f64(jittered))
    }

    /// Reset the sequence, e.g. after a successful attempt.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_delay_grows_and_caps() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut backoff = Backoff::new(BackoffConfig::dht_bootstrap());

        let mut last = Duration::ZERO;
        for _ in 0..5 {
            let delay = backoff.next_delay(&mut rng).expect("delay");
            // Jitter means this isn't strictly monotonic, but the cap holds.
            assert!(delay <= Duration::from_secs(120) + Duration::from_millis(1));
            last = delay;
        }
        let _ = last;
        assert!(backoff.exhausted());
    }

    #[test]
    fn test_exhausted_after_max_attempts() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut backoff = Backoff::new(BackoffConfig {
            initial_delay: Duration::from_millis(1),
            multiplier: 1.5,
            max_delay: Duration::from_secs(1),
            max_attempts: 3,
        });

        for _ in 0..3 {
            assert!(backoff.next_delay(&mut rng).is_some());
        }
        assert!(backoff.next_delay(&mut rng).is_none());
        assert!(backoff.exhausted());
    }

    #[test]
    fn test_reset_reopens_schedule() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut backoff = Backoff::new(BackoffConfig {
            initial_delay: Duration::from_millis(1),
            multiplier: 1.5,
            max_delay: Duration::from_secs(1),
            max_attempts: 1,
        });
        assert!(backoff.next_delay(&mut rng).is_some());
        assert!(backoff.exhausted());
        backoff.reset();
        assert!(!backoff.exhausted());
    }

    #[test]
    fn test_jitter_bounds() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut backoff = Backoff::new(BackoffConfig {
            initial_delay: Duration::from_secs(10),
            multiplier: 1.0,
            max_delay: Duration::from_secs(1000),
            max_attempts: 20,
        });
        for _ in 0..20 {
            let delay = backoff.next_delay(&mut rng).unwrap();
            assert!(delay >= Duration::from_secs(5));
            assert!(delay <= Duration::from_secs(15));
        }
    }
}
