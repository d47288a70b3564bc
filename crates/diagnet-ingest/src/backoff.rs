use rand::Rng;
use std::time::Duration;

/// Jitter applied to every delay: ±20% of the nominal value.
const JITTER_FRACTION: f64 = 0.2;

/// Exponential backoff with jitter. Doubles the nominal delay on every
/// call, clamped to `max`; `reset()` returns to the initial delay after a
/// success.
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Broker reconnect policy: 1s doubling to 60s.
    pub fn reconnect() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }

    /// Store retry policy: 1s doubling to 30s.
    pub fn store_retry() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }

    /// Returns the next delay (with jitter applied) and advances the
    /// nominal delay.
    pub fn next_delay(&mut self) -> Duration {
        let nominal = self.current;
        self.current = (self.current * 2).min(self.max);

        let jitter = rand::rng().random_range(-JITTER_FRACTION..=JITTER_FRACTION);
        let secs = nominal.as_secs_f64() * (1.0 + jitter);
        Duration::from_secs_f64(secs.max(0.0))
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
