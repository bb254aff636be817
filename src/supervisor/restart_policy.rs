use std::time::{Duration, Instant};

/// Exponential backoff with a rolling window: `max_restarts` failures inside
/// `restart_period` exhausts the policy and the caller should stop trying
/// (worker ends up `Stopped`, not endlessly respawned). A restart more than
/// `restart_period` after the last one resets the counter, since it's not
/// part of the same crash loop.
pub struct RestartPolicy {
    initial_ms: u64,
    multiplier: f64,
    max_ms: u64,
    max_restarts: u32,
    period: Duration,

    attempts: u32,
    window_start: Option<Instant>,
    last_delay_ms: u64,
}

impl RestartPolicy {
    pub fn new(initial_ms: u64, multiplier: f64, max_ms: u64, max_restarts: u32, period_secs: u64) -> Self {
        RestartPolicy { initial_ms, multiplier, max_ms, max_restarts, period: Duration::from_secs(period_secs), attempts: 0, window_start: None, last_delay_ms: 0 }
    }

    /// Records one crash and returns the delay to wait before respawning, or
    /// `None` if the policy is exhausted for this window.
    pub fn record_crash(&mut self) -> Option<Duration> {
        let now = Instant::now();
        let in_window = self.window_start.map(|start| now.duration_since(start) < self.period).unwrap_or(false);

        if !in_window {
            self.window_start = Some(now);
            self.attempts = 0;
            self.last_delay_ms = 0;
        }

        self.attempts += 1;
        if self.attempts > self.max_restarts {
            return None;
        }

        self.last_delay_ms = if self.last_delay_ms == 0 { self.initial_ms } else { ((self.last_delay_ms as f64) * self.multiplier) as u64 };
        self.last_delay_ms = self.last_delay_ms.min(self.max_ms);

        Some(Duration::from_millis(self.last_delay_ms))
    }

    /// A clean exit (recycle, graceful stop) doesn't count against the
    /// crash-loop budget.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.window_start = None;
        self.last_delay_ms = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_each_attempt_up_to_the_ceiling() {
        let mut policy = RestartPolicy::new(100, 2.0, 1000, 10, 60);
        assert_eq!(policy.record_crash(), Some(Duration::from_millis(100)));
        assert_eq!(policy.record_crash(), Some(Duration::from_millis(200)));
        assert_eq!(policy.record_crash(), Some(Duration::from_millis(400)));
        assert_eq!(policy.record_crash(), Some(Duration::from_millis(800)));
        assert_eq!(policy.record_crash(), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn exhausts_after_max_restarts_within_the_window() {
        let mut policy = RestartPolicy::new(10, 2.0, 1000, 2, 60);
        assert!(policy.record_crash().is_some());
        assert!(policy.record_crash().is_some());
        assert!(policy.record_crash().is_none());
    }

    #[test]
    fn reset_clears_the_crash_loop_budget() {
        let mut policy = RestartPolicy::new(10, 2.0, 1000, 1, 60);
        assert!(policy.record_crash().is_some());
        assert!(policy.record_crash().is_none());
        policy.reset();
        assert!(policy.record_crash().is_some());
    }
}
