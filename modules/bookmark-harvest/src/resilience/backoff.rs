use std::time::Duration;

use rand::Rng;

/// Spread applied around each exponential step. Kept below 1/3 so that the
/// largest delay for attempt `n` never exceeds the smallest for `n + 1`.
const JITTER_RATIO: f64 = 0.25;

/// Exponential backoff: `base * 2^attempt`, ± jitter, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before retry number `attempt` (0-based), with random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let unit: f64 = rand::rng().random_range(-1.0..=1.0);
        self.delay_with(attempt, unit)
    }

    /// Deterministic variant: `unit` in `[-1, 1]` selects the jitter.
    pub fn delay_with(&self, attempt: u32, unit: f64) -> Duration {
        let step = self.base.as_secs_f64() * 2f64.powi(attempt.min(32) as i32);
        let jittered = step * (1.0 + JITTER_RATIO * unit.clamp(-1.0, 1.0));
        let capped = jittered.min(self.max.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(capped)
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}
