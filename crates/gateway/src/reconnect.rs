//! Jittered exponential back-off for upstream STT/TTS reconnection.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl ReconnectBackoff {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.backoff_factor.powi(attempt as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        let jitter = capped_ms * 0.25 * pseudo_random_fraction(attempt);
        Duration::from_millis((capped_ms + jitter) as u64)
    }
}

/// Deterministic "random" fraction in [0, 1) keyed on the attempt number —
/// enough to spread reconnect storms without pulling in a RNG crate.
fn pseudo_random_fraction(attempt: u32) -> f64 {
    let hash = attempt.wrapping_mul(2654435761);
    (hash as f64) / (u32::MAX as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_with_backoff() {
        let p = ReconnectBackoff::default();
        assert!(p.delay_for_attempt(1) > p.delay_for_attempt(0));
        assert!(p.delay_for_attempt(2) > p.delay_for_attempt(1));
    }

    #[test]
    fn delay_capped_at_max() {
        let p = ReconnectBackoff {
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(30),
            backoff_factor: 10.0,
        };
        assert!(p.delay_for_attempt(10) <= Duration::from_millis(37_500));
    }
}
