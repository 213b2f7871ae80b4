use std::{future::Future, time::Duration};
use tokio::time;
use super::{Result, TrackerError};

// Reference: https://www.bittorrent.org/beps/bep_0015.html
// If a response is not received after 15 * 2 ^ n seconds, the client should retransmit the request.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {

    // Total number of transmissions, including the first.
    pub max_attempts: u32,

    // Time to wait for a response to the first transmission, doubled on each attempt.
    pub base_delay: Duration,

}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {

    pub fn timeout(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1 << attempt.min(31))
    }

    // Runs the attempt function until it succeeds, each attempt bounded by its backoff timeout.
    // Io errors and timeouts are retried, other errors are returned immediately.
    pub async fn run<T, F, Fut>(&self, mut attempt_fn: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        for attempt in 0..self.max_attempts {
            let timeout = self.timeout(attempt);
            match time::timeout(timeout, attempt_fn(attempt)).await {
                Ok(Ok(v)) => return Ok(v),
                Ok(Err(TrackerError::IoError(e))) => {
                    tracing::warn!("attempt {} failed: {}", attempt + 1, e);
                    // Don't spin on immediate failures, wait out the attempt unless it was the last.
                    if attempt + 1 < self.max_attempts {
                        time::sleep(timeout).await;
                    }
                },
                Ok(Err(e)) => return Err(e),
                Err(_) => tracing::warn!("attempt {} timed out after {}s", attempt + 1, timeout.as_secs()),
            }
        }
        Err(TrackerError::RetriesExhausted { attempts: self.max_attempts })
    }
}
