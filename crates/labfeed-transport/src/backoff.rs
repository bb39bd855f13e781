//! Reconnect backoff policy.

use std::time::{Duration, SystemTime};

use labfeed_config::ReconnectConfig;

/// Exponential backoff with an upper bound and proportional jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the computed delay added or removed at random, `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

impl Backoff {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }

    /// Delay before retry number `attempt` (zero based). Never exceeds
    /// `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let max_ms = self.max_delay.as_millis() as f64;
        let exponent = attempt.min(32) as i32;
        let delay = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let delay = delay.min(max_ms);

        let jitter = self.jitter.clamp(0.0, 1.0);
        let delay_ms = if jitter > 0.0 {
            (delay + rand_jitter(delay * jitter)).clamp(0.0, max_ms)
        } else {
            delay
        };

        Duration::from_millis(delay_ms as u64)
    }
}

/// Pseudo-random value in `-max..=max` taken from the clock.
fn rand_jitter(max: f64) -> f64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos as f64 / 1_000_000_000.0) * max * 2.0 - max
}
