//! Bounded retry policy
//!
//! Retries in this crate are fixed-count busy loops with a constant pause,
//! not exponential backoff: discovery retries immediately, the MQTT connect
//! loop pauses one second between attempts. Keeping the bound and the delay
//! in one value makes both testable away from any network code.

use std::future::Future;
use std::time::Duration;

/// A fixed number of attempts with a constant inter-attempt delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// `max_attempts` must be at least 1.
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        assert!(max_attempts >= 1);
        Self {
            max_attempts,
            delay,
        }
    }

    /// Run `attempt` until it succeeds or the bound is exhausted, sleeping
    /// `delay` between attempts (never after the last one). Returns the last
    /// error on exhaustion.
    pub async fn run<T, E, F, Fut>(&self, mut attempt: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut last_err = None;
        for n in 1..=self.max_attempts {
            match attempt(n).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    last_err = Some(e);
                    if n < self.max_attempts && !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }
        Err(last_err.expect("max_attempts >= 1 guarantees at least one attempt"))
    }
}
