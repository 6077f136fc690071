//! Exponential retry backoff.

use std::time::{Duration, Instant};

use crate::config::RetryConfig;

/// Tracks when the next connection-seeking attempt may start.
///
/// Each attempt doubles the wait up to the cap. Any topology change resets
/// the wait to its initial value, since edges are evidently forming.
#[derive(Debug, Clone)]
pub struct RetryTimer {
    initial: Duration,
    max: Duration,
    current: Duration,
    last_attempt: Option<Instant>,
}

impl RetryTimer {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            initial: config.initial,
            max: config.max,
            current: config.initial,
            last_attempt: None,
        }
    }

    /// Has the current interval elapsed since the last attempt?
    pub fn is_ready(&self, now: Instant) -> bool {
        match self.last_attempt {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.current,
        }
    }

    /// Start an attempt if allowed, doubling the next wait.
    pub fn try_begin(&mut self, now: Instant) -> bool {
        if !self.is_ready(now) {
            return false;
        }
        self.last_attempt = Some(now);
        self.current = (self.current * 2).min(self.max);
        true
    }

    /// Back to the initial interval.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Forget the last attempt so the next one may start immediately.
    pub fn force_ready(&mut self) {
        self.last_attempt = None;
    }

    pub fn current_interval(&self) -> Duration {
        self.current
    }

    /// When the next attempt becomes possible, if one was made before.
    pub fn next_retry_at(&self) -> Option<Instant> {
        self.last_attempt.map(|last| last + self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer() -> RetryTimer {
        RetryTimer::new(RetryConfig::default())
    }

    #[test]
    fn doubles_up_to_cap() {
        let mut t = timer();
        let mut now = Instant::now();
        assert!(t.try_begin(now));
        assert_eq!(t.current_interval(), Duration::from_secs(20));
        assert!(!t.try_begin(now + Duration::from_secs(19)));
        now += Duration::from_secs(20);
        assert!(t.try_begin(now));
        assert_eq!(t.current_interval(), Duration::from_secs(40));
        now += Duration::from_secs(40);
        assert!(t.try_begin(now));
        assert_eq!(t.current_interval(), Duration::from_secs(60));
        now += Duration::from_secs(60);
        assert!(t.try_begin(now));
        assert_eq!(t.current_interval(), Duration::from_secs(60));
        assert_eq!(t.next_retry_at(), Some(now + Duration::from_secs(60)));
    }

    #[test]
    fn reset_and_force() {
        let mut t = timer();
        let now = Instant::now();
        assert!(t.try_begin(now));
        assert!(t.try_begin(now + Duration::from_secs(20)));
        t.reset();
        assert_eq!(t.current_interval(), Duration::from_secs(10));
        assert!(!t.is_ready(now + Duration::from_secs(25)));
        assert!(t.is_ready(now + Duration::from_secs(30)));
        t.force_ready();
        assert!(t.is_ready(now));
    }
}
