//! Retry logic and backoff calculation for registry installs.

use std::thread;
use std::time::Duration;

use log::warn;

use crate::defaults::{INSTALL_ATTEMPTS, INSTALL_BASE_DELAY};
use crate::error::{Error, Result};

/// Exponential backoff policy: attempt `n` (1-based) waits
/// `base_delay * 2^(n-1)` before running again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: INSTALL_ATTEMPTS,
            base_delay: INSTALL_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Policy that never waits, for tests and dry runs.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay after the failed `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }

    /// Runs `op` until it succeeds, fails with a non-transient error, or the
    /// attempts run out. `what` names the operation in log messages.
    pub fn run<T, F>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && e.is_transient() => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        what,
                        attempt,
                        attempts,
                        delay,
                        first_line(&e)
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn first_line(error: &Error) -> String {
    error.to_string().lines().next().unwrap_or_default().to_string()
}
