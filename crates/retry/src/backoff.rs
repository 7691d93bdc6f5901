use std::time::Duration;

const MULTIPLIER: f64 = 2.0;

/// Capped exponential backoff
///
/// Stateless: the attempt number comes from the payment's ledger, not from this value.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial.min(self.max);
        }
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay_ms = self.initial.as_millis() as f64 * MULTIPLIER.powi(exponent);
        let delay_ms = delay_ms.min(self.max.as_millis() as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(3600))
    }
}
