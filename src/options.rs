use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Options {
    pub segment_count: usize,
    /// Upper bound on fetch tasks running at once. `None` runs every segment at once.
    pub max_parallel_downloads: Option<usize>,
    pub retry: RetryPolicy,
    pub timeout: Duration,
    pub show_progress: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            segment_count: 20,
            max_parallel_downloads: None,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
            show_progress: true,
        }
    }
}

/// How a segment fetch reacts to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` keeps retrying until the segment completes.
    pub max_attempts: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn immediate() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    /// Delay before retry number `retry` (1-based), doubling each time up to `max_delay`.
    pub fn delay(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(retry - 1).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn allows(&self, attempts_made: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempts_made < max,
            None => true,
        }
    }
}
