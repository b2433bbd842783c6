use std::time::Duration;

/// Bounded exponential backoff for per-peer reconnect scheduling.
///
/// Exceeding the attempt cap surfaces a terminal failure for that peer only.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    attempt: u32,
    max_attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            attempt: 0,
            max_attempts,
        }
    }

    /// Delay before the next attempt, or `None` once the cap is exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let delay = self.base * 2u32.saturating_pow(self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    /// A successful connection resets the schedule
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), 5)
    }
}
