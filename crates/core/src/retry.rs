//! Retry policy and the sleep seam.
//!
//! Both blocking retry points in the core (sensor acquisition and batch
//! delivery) take an explicit [`RetryPolicy`] and a [`Sleep`] implementation,
//! so production can bound worst-case stalls and tests never actually sleep.

use std::time::Duration;

/// How many times to try an operation and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; `None` retries forever
    pub max_attempts: Option<u32>,

    /// Fixed delay between attempts
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Retry forever with a fixed delay.
    pub const fn unbounded(backoff: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff,
        }
    }

    /// Give up after `max_attempts` tries.
    pub const fn bounded(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff,
        }
    }

    /// Single attempt, no waiting.
    pub const fn once() -> Self {
        Self {
            max_attempts: Some(1),
            backoff: Duration::ZERO,
        }
    }

    /// Whether another attempt is allowed after `attempts_made` tries.
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempts_made < max,
            None => true,
        }
    }

    /// Run `op` until it succeeds, the error is not retryable, or the policy
    /// is exhausted.
    ///
    /// `on_failure` sees every failed attempt (1-based) before the backoff.
    /// Returns the number of attempts made alongside the final outcome.
    pub fn run<T, E, S, F, R, L>(
        &self,
        sleeper: &mut S,
        mut op: F,
        retryable: R,
        mut on_failure: L,
    ) -> (u32, Result<T, E>)
    where
        S: Sleep + ?Sized,
        F: FnMut() -> Result<T, E>,
        R: Fn(&E) -> bool,
        L: FnMut(u32, &E),
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op() {
                Ok(value) => return (attempts, Ok(value)),
                Err(err) => {
                    on_failure(attempts, &err);
                    if !retryable(&err) || !self.allows_another(attempts) {
                        return (attempts, Err(err));
                    }
                    sleeper.sleep(self.backoff);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    /// Unbounded retries 15 seconds apart.
    fn default() -> Self {
        Self::unbounded(Duration::from_secs(15))
    }
}

/// Blocking delay seam.
pub trait Sleep {
    /// Block for `duration`.
    fn sleep(&mut self, duration: Duration);
}

/// Real thread sleep.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleep;

impl Sleep for ThreadSleep {
    fn sleep(&mut self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Records requested delays without sleeping.
#[derive(Debug, Default, Clone)]
pub struct RecordingSleep {
    /// Every delay requested, in order
    pub delays: Vec<Duration>,
}

impl RecordingSleep {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of all requested delays.
    pub fn total(&self) -> Duration {
        self.delays.iter().sum()
    }
}

impl Sleep for RecordingSleep {
    fn sleep(&mut self, duration: Duration) {
        self.delays.push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_succeeds_after_failures() {
        let policy = RetryPolicy::unbounded(Duration::from_millis(10));
        let mut sleeper = RecordingSleep::new();
        let mut remaining_failures = 3;

        let (attempts, result) = policy.run(
            &mut sleeper,
            || {
                if remaining_failures > 0 {
                    remaining_failures -= 1;
                    Err("busy")
                } else {
                    Ok(42)
                }
            },
            |_| true,
            |_, _| {},
        );

        assert_eq!(result, Ok(42));
        assert_eq!(attempts, 4);
        assert_eq!(sleeper.delays, vec![Duration::from_millis(10); 3]);
    }

    #[test]
    fn test_bounded_gives_up() {
        let policy = RetryPolicy::bounded(2, Duration::from_secs(1));
        let mut sleeper = RecordingSleep::new();
        let mut seen = Vec::new();

        let (attempts, result): (u32, Result<(), &str>) = policy.run(
            &mut sleeper,
            || Err("down"),
            |_| true,
            |n, _| seen.push(n),
        );

        assert_eq!(result, Err("down"));
        assert_eq!(attempts, 2);
        assert_eq!(seen, vec![1, 2]);
        // No sleep after the final attempt
        assert_eq!(sleeper.delays.len(), 1);
    }

    #[test]
    fn test_non_retryable_stops_immediately() {
        let policy = RetryPolicy::unbounded(Duration::from_secs(1));
        let mut sleeper = RecordingSleep::new();

        let (attempts, result): (u32, Result<(), &str>) =
            policy.run(&mut sleeper, || Err("fatal"), |_| false, |_, _| {});

        assert_eq!(result, Err("fatal"));
        assert_eq!(attempts, 1);
        assert!(sleeper.delays.is_empty());
    }

    #[test]
    fn test_once() {
        let policy = RetryPolicy::once();
        assert!(policy.allows_another(0));
        assert!(!policy.allows_another(1));
    }
}
