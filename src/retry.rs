use std::time::Duration;

/// Bounded retry with a fixed delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Pause between two attempts
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        RetryPolicy { max_retries, delay }
    }

    /// Total number of attempts, first one included
    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Sleeps before attempt `next` (1-based) unless it is the first
    pub fn pause_before(&self, next: u32) {
        if next > 1 && !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_attempts() {
        assert_eq!(RetryPolicy::new(3, Duration::ZERO).attempts(), 4);
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts(), 1);
    }

    #[test]
    fn test_no_pause_before_first_attempt() {
        let policy = RetryPolicy::new(1, Duration::from_secs(5));
        let start = Instant::now();
        policy.pause_before(1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
