//! Bounded retry with fixed backoff.

use std::time::Duration;

/// Retry policy for transient infrastructure failures.
///
/// Deliberately small: a fixed number of attempts with a fixed delay. The
/// kernel retries reads against healthy stores a handful of times and then
/// surfaces the failure; it never retries caller errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (0 is treated as 1).
    pub max_attempts: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// A policy that runs the operation exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }

    /// Run `op` until it succeeds or the attempt budget is exhausted.
    ///
    /// Returns the last error when all attempts fail.
    pub fn run<T, E, F>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) => {
                    last_err = Some(e);
                    if attempt < attempts && !self.delay.is_zero() {
                        std::thread::sleep(self.delay);
                    }
                }
            }
        }

        // attempts >= 1, so last_err is always set on the failure path.
        Err(last_err.unwrap())
    }
}
