use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Wait before reconnect `attempt` (1-based): `base * 2^(attempt-1)`.
    /// `None` once the attempts are used up.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let mult = 1u64 << attempt.min(32).saturating_sub(1);
        let millis = self.base_delay.as_millis() as u64;
        Some(Duration::from_millis(millis.saturating_mul(mult)))
    }
}
