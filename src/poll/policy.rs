use std::time::Duration;

use crate::targets::Target;

/// Bounded retry: how many attempts, how long to wait between them, and how
/// long each network wait may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub navigation_timeout: Duration,
    pub quiescent_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(5),
            navigation_timeout: Duration::from_secs(180),
            quiescent_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// At least one attempt is always made.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            ..Self::default()
        }
    }

    pub fn with_timeouts(mut self, navigation: Duration, quiescent: Duration) -> Self {
        self.navigation_timeout = navigation;
        self.quiescent_timeout = quiescent;
        self
    }
}

/// Settings for waiting out a table that is still filling in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stability {
    /// Consecutive equal counts required.
    pub checks: u32,
    pub interval: Duration,
    /// Give up on the attempt after this many counts.
    pub max_checks: u32,
}

impl Default for Stability {
    fn default() -> Self {
        Self {
            checks: 3,
            interval: Duration::from_secs(1),
            max_checks: 30,
        }
    }
}

/// When a table's row count is good enough to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acceptance {
    /// Exactly `expected_rows` data rows plus the header row.
    Exact { expected_rows: usize },
    /// Whatever non-zero count stays put across `checks` reads.
    Stable(Stability),
}

impl Acceptance {
    pub fn for_target(target: &Target, stability: &Stability) -> Self {
        match target.expected_rows {
            Some(expected_rows) => Acceptance::Exact { expected_rows },
            None => Acceptance::Stable(stability.clone()),
        }
    }

    /// Row count (header included) an exact target must show.
    pub fn exact_row_count(expected_rows: usize) -> usize {
        expected_rows + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Pending,
    Stable(usize),
}

/// Tracks how many reads in a row returned the same count.
#[derive(Debug, Clone)]
pub struct StabilityTracker {
    required: u32,
    last: Option<usize>,
    run: u32,
}

impl StabilityTracker {
    pub fn new(required: u32) -> Self {
        Self {
            required: required.max(1),
            last: None,
            run: 0,
        }
    }

    pub fn observe(&mut self, count: usize) -> Observation {
        if self.last == Some(count) {
            self.run += 1;
        } else {
            self.last = Some(count);
            self.run = 1;
        }
        if self.run >= self.required {
            Observation::Stable(count)
        } else {
            Observation::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noisy_first_read_then_three_equal() {
        let mut tracker = StabilityTracker::new(3);
        assert_eq!(tracker.observe(0), Observation::Pending);
        assert_eq!(tracker.observe(42), Observation::Pending);
        assert_eq!(tracker.observe(42), Observation::Pending);
        assert_eq!(tracker.observe(42), Observation::Stable(42));
    }

    #[test]
    fn a_change_resets_the_run() {
        let mut tracker = StabilityTracker::new(2);
        assert_eq!(tracker.observe(10), Observation::Pending);
        assert_eq!(tracker.observe(11), Observation::Pending);
        assert_eq!(tracker.observe(11), Observation::Stable(11));
    }

    #[test]
    fn stable_zero_is_reported_as_zero() {
        let mut tracker = StabilityTracker::new(2);
        tracker.observe(0);
        assert_eq!(tracker.observe(0), Observation::Stable(0));
    }

    #[test]
    fn acceptance_follows_expected_count() {
        let stability = Stability::default();
        assert_eq!(
            Acceptance::for_target(&Target::new("a", Some(5)), &stability),
            Acceptance::Exact { expected_rows: 5 }
        );
        assert_eq!(
            Acceptance::for_target(&Target::new("a", None), &stability),
            Acceptance::Stable(stability.clone())
        );
        assert_eq!(Acceptance::exact_row_count(5), 6);
    }

    #[test]
    fn at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
