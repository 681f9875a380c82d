use std::time::Duration;

use rand::Rng;

/// Reconnect schedule: `delay(i) = min(base * 2^i, cap)` for the i-th retry,
/// with up to `jitter * delay(i)` added on top (never past `cap`).
///
/// Because the jitter band of one step never reaches past the next step's
/// base delay, the jittered schedule is non-decreasing as well.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    /// Fraction in `[0, 1]`; values outside are clamped.
    pub jitter: f64,
    /// Retries allowed after the first failed attempt.
    pub max_retries: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            jitter: 0.1,
            max_retries: 10,
        }
    }
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |d| d.min(self.cap))
    }

    pub fn jittered(&self, attempt: u32) -> Duration {
        let delay = self.delay(attempt);
        let ratio = self.jitter.clamp(0.0, 1.0);
        if ratio == 0.0 {
            return delay;
        }
        let extra = delay.mul_f64(rand::thread_rng().gen_range(0.0..=ratio));
        (delay + extra).min(self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: f64) -> Backoff {
        Backoff {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            jitter,
            max_retries: 10,
        }
    }

    #[test]
    fn test_doubles_until_cap() {
        let b = policy(0.0);
        let secs: Vec<u64> = (0..8).map(|i| b.delay(i).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn test_huge_attempt_saturates_at_cap() {
        let b = policy(0.0);
        assert_eq!(b.delay(31), b.cap);
        assert_eq!(b.delay(64), b.cap);
        assert_eq!(b.delay(u32::MAX), b.cap);
    }

    #[test]
    fn test_jittered_schedule_is_monotonic_and_capped() {
        for jitter in [0.0, 0.1, 0.5, 1.0, 3.0] {
            let b = policy(jitter);
            for _ in 0..50 {
                let delays: Vec<Duration> = (0..12).map(|i| b.jittered(i)).collect();
                for w in delays.windows(2) {
                    assert!(w[0] <= w[1], "jitter {jitter}: {delays:?}");
                }
                for (i, d) in delays.iter().enumerate() {
                    assert!(*d >= b.delay(i as u32));
                    assert!(*d <= b.cap);
                }
            }
        }
    }

    #[test]
    fn test_base_above_cap_is_clamped() {
        let b = Backoff {
            base: Duration::from_secs(90),
            ..policy(0.0)
        };
        assert_eq!(b.delay(0), Duration::from_secs(60));
    }
}
