use std::time::Duration;

use rand::Rng;

/// Exponential delay schedule: `base * 2^attempt`, capped at `max`, with
/// optional full jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Default for Backoff {
    /// Schedule used for startup token acquisition.
    fn default() -> Self {
        Self::new(Duration::from_millis(250), Duration::from_secs(10), true)
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let cap = self.max.min(
            self.base
                .checked_mul(1u32 << attempt.min(20))
                .unwrap_or(self.max),
        );
        if !self.jitter {
            return cap;
        }
        let cap_ms = u64::try_from(cap.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rng.gen_range(0..=cap_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn doubles_until_cap_without_jitter() {
        let backoff = Backoff::new(Duration::from_millis(250), Duration::from_secs(1), false);
        let mut rng = StdRng::seed_from_u64(7);
        let delays: Vec<_> = (0..5)
            .map(|attempt| backoff.delay_with_rng(attempt, &mut rng).as_millis())
            .collect();
        assert_eq!(delays, vec![250, 500, 1000, 1000, 1000]);
    }

    #[test]
    fn huge_attempt_numbers_stay_capped() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10), false);
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn jittered_delay_never_exceeds_step() {
        let backoff = Backoff::default();
        let mut rng = StdRng::seed_from_u64(42);
        for attempt in 0..8 {
            let step = Duration::from_millis(250 * (1 << attempt)).min(Duration::from_secs(10));
            assert!(backoff.delay_with_rng(attempt, &mut rng) <= step);
        }
    }
}
