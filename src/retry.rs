use crate::config::BackoffConfig;
use rand::Rng;
use std::time::Duration;

/// Exponential backoff with full jitter between abandoned rounds.
pub struct Backoff {
    max: Duration,
    v: Duration,
    initial: Duration,
}

fn apply_jitter(duration: Duration) -> Duration {
    let nanos = duration.as_nanos() as u64;
    if nanos == 0 {
        return duration;
    }
    Duration::from_nanos(rand::rng().random_range(0..=nanos))
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Backoff {
        Backoff {
            max: config.max,
            v: config.initial,
            initial: config.initial,
        }
    }

    /// Resets the backoff to the initial backoff.
    pub fn reset(&mut self) {
        self.v = self.initial;
    }

    pub fn next_wait(&mut self) -> Duration {
        let v = self.v;
        if v >= self.max {
            apply_jitter(self.max)
        } else {
            self.v = v * 2;
            apply_jitter(v)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waits_are_capped() {
        let mut backoff = Backoff::new(BackoffConfig {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(40),
        });
        let bounds = [10, 20, 40, 40, 40];
        for bound in bounds.iter() {
            assert!(backoff.next_wait() <= Duration::from_millis(*bound));
        }

        backoff.reset();
        assert_eq!(Duration::from_millis(10), backoff.v);
    }

    #[test]
    fn no_backoff() {
        let mut backoff = Backoff::new(BackoffConfig::none());
        assert_eq!(Duration::from_millis(0), backoff.next_wait());
        assert_eq!(Duration::from_millis(0), backoff.next_wait());
    }
}
